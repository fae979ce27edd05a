use testbed_admin::{Address, CommandKind, CommandSpec, DestinationOptions, Parameters};

/// Builds the admin tool's command line for one command.
///
/// Layout: addressing, credentials, discovery settings, verb and target,
/// then `name=value` parameters. Installs are local and carry the node name
/// instead of an address. Deployments append their fragment settings and
/// finally the application arguments verbatim.
pub fn command_arguments(
    node_name: Option<&str>,
    options: &DestinationOptions,
    discovery_port: Option<u16>,
    spec: &CommandSpec,
    parameters: &Parameters,
) -> Vec<String> {
    let mut arguments = Vec::new();
    let install = spec.kind == CommandKind::InstallNode;

    if !install {
        match &options.address {
            Address::Service(name) => arguments.push(format!("servicename={name}")),
            Address::AdminPort { port, host_name } => {
                arguments.push(format!("adminport={port}"));
                if let Some(host_name) = host_name {
                    arguments.push(format!("hostname={host_name}"));
                }
            }
            Address::Unaddressed => {}
        }
    }

    if let Some(user_name) = &options.user_name {
        arguments.push(format!("username={user_name}"));
    }
    if let Some(password) = &options.password {
        arguments.push(format!("password={password}"));
    }

    // An explicit parameter wins over the destination's setting.
    if let Some(port) = discovery_port
        .filter(|port| *port != 0)
        .filter(|_| !parameters.contains_key("discoveryport"))
    {
        arguments.push(format!("discoveryport={port}"));
    }
    if !options.discovery_hosts.is_empty() && !parameters.contains_key("discoveryhosts") {
        arguments.push(format!(
            "discoveryhosts={}",
            options.discovery_hosts.join(",")
        ));
    }

    arguments.push(spec.command.clone());
    arguments.push(spec.target.clone());

    if install {
        if let Some(node_name) = node_name.filter(|_| !parameters.contains_key("nodename")) {
            arguments.push(format!("nodename={node_name}"));
        }
    }

    arguments.extend(
        parameters
            .iter()
            .map(|(name, value)| format!("{name}={value}")),
    );

    if let CommandKind::DeployFragment(deploy) = &spec.kind {
        arguments.push(format!("fragmenttype={}", deploy.fragment_type));

        if !deploy.execution_options.is_empty() {
            arguments.push(format!(
                "executionoptions={}",
                deploy.execution_options.join(" ")
            ));
        }
        if !deploy.eventflow_directories.is_empty() {
            let directories: Vec<_> = deploy
                .eventflow_directories
                .iter()
                .map(|directory| directory.display().to_string())
                .collect();
            arguments.push(format!("eventflowdirectories={}", directories.join(",")));
        }
        if let Some(directory) = &deploy.liveview_directory {
            arguments.push(format!("liveviewdirectory={}", directory.display()));
        }

        arguments.extend(deploy.application_arguments.iter().cloned());
    }

    arguments
}
