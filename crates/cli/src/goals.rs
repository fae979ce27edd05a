use std::sync::Arc;

use testbed_admin::{Address, AdminService, DeployOptions};
use testbed_admin_process::{ProcessAdminService, ProcessAdminServiceOptions};
use testbed_installer::{ProductArtifact, ProductInstaller, ProductInstallerOptions};
use testbed_locks_file::FileLockManager;
use testbed_orchestrator::{
    BuildType, DiscoveryConfig, NodeLifecycleOrchestrator, OrchestratorOptions,
};
use testbed_runner::{CommandRunner, ErrorHandling};
use testbed_util::parse_name_values;
use tracing::info;

use crate::Error;
use crate::args::{
    AdministerArgs, ClusterArgs, DeployFragmentArgs, InstallProductArgs, StartNodesArgs,
    StopNodesArgs,
};

fn orchestrator(cluster: ClusterArgs, build_type: BuildType) -> NodeLifecycleOrchestrator {
    let admin = ProcessAdminService::new(ProcessAdminServiceOptions {
        executable: cluster.admin_executable,
        ..ProcessAdminServiceOptions::default()
    });
    let context = admin.new_context(&cluster.product_home);

    NodeLifecycleOrchestrator::new(OrchestratorOptions {
        admin: Arc::new(admin),
        context,
        runner: CommandRunner::default(),
        cluster_name: cluster.cluster_name,
        node_directory: cluster.node_directory,
        discovery_hosts: cluster.discovery_hosts,
        discovery_port: cluster.discovery_port,
        discovery_port_file: cluster.discovery_port_file,
        user_name: cluster.user_name,
        password: cluster.password,
        environment: parse_name_values(&cluster.environment),
        build_type,
    })
}

pub async fn install_product(args: InstallProductArgs) -> Result<(), Error> {
    let mut options = ProductInstallerOptions::with_lock_manager(FileLockManager::default());
    if !args.validation_files.is_empty() {
        options.validation_files = args.validation_files;
    }
    let installer = ProductInstaller::new(options);

    let artifacts: Vec<_> = args
        .archives
        .into_iter()
        .map(ProductArtifact::from_path)
        .collect();

    let outcomes = installer
        .install_products(&args.product_home, &args.markers_directory, &artifacts)
        .await?;

    for (name, outcome) in outcomes {
        info!("{}: {:?}", name, outcome);
    }

    Ok(())
}

pub async fn start_nodes(args: StartNodesArgs) -> Result<(), Error> {
    if args.skip_start {
        info!("Start nodes is skipped");
        return Ok(());
    }

    let orchestrator = orchestrator(args.cluster, args.build_type.into());

    let discovery = if args.skip_install {
        DiscoveryConfig::dynamic(orchestrator.discovery_port())
    } else {
        orchestrator
            .install_nodes(&args.nodes, &parse_name_values(&args.install_arguments))
            .await?
    };

    if args.install_only {
        info!("Nodes installed, not starting");
        return Ok(());
    }

    orchestrator
        .start_nodes(
            &args.nodes,
            &discovery,
            &parse_name_values(&args.start_arguments),
        )
        .await?;

    Ok(())
}

pub async fn stop_nodes(args: StopNodesArgs) -> Result<(), Error> {
    let orchestrator = orchestrator(args.cluster, BuildType::default());
    let error_handling = if args.clean {
        ErrorHandling::Ignore
    } else {
        ErrorHandling::Fail
    };

    if let Some(install_path) = &args.install_path {
        if !args.skip_remove {
            orchestrator
                .remove_installation(install_path, error_handling)
                .await?;
        }
        return Ok(());
    }

    let nodes = args.nodes.as_deref();

    if args.skip_stop {
        info!("Stop nodes is skipped");
    } else {
        orchestrator.stop_nodes(nodes, error_handling).await?;
    }

    if args.skip_remove {
        info!("Remove nodes is skipped");
    } else {
        orchestrator.remove_nodes(nodes, error_handling).await?;
    }

    Ok(())
}

pub async fn administer(args: AdministerArgs) -> Result<(), Error> {
    let address = match (args.admin_port, args.service_name) {
        (Some(port), _) => Address::AdminPort {
            port,
            host_name: args.host_name,
        },
        (None, Some(service_name)) => Address::Service(service_name),
        (None, None) => Address::Service(args.cluster.cluster_name.clone()),
    };

    // The runner logs the command's output as it arrives.
    orchestrator(args.cluster, BuildType::default())
        .administer(
            &args.command,
            &args.target,
            address,
            parse_name_values(&args.arguments),
        )
        .await?;

    Ok(())
}

pub async fn deploy_fragment(args: DeployFragmentArgs) -> Result<(), Error> {
    let deploy = DeployOptions {
        fragment_type: args.fragment_type.into(),
        execution_options: args.execution_options,
        application_arguments: args.application_arguments,
        eventflow_directories: args.eventflow_directories,
        liveview_directory: args.liveview_directory,
    };

    let orchestrator = orchestrator(args.cluster, BuildType::default());
    let outcome = orchestrator
        .deploy_fragment(
            args.service_name.as_deref(),
            deploy,
            &args.target,
            parse_name_values(&args.deploy_arguments),
            !args.detach,
        )
        .await?;

    if outcome.is_detached() {
        info!("Deployment of {} dispatched", args.target);
    }

    Ok(())
}
