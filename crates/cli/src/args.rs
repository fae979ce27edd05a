use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use testbed_admin::FragmentType;
use testbed_orchestrator::BuildType;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true, env = "TESTBED_VERBOSE")]
    pub verbose: bool,

    #[command(subcommand)]
    pub goal: Goal,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Goal {
    /// Install product archives into the product home
    InstallProduct(InstallProductArgs),

    /// Install and start test nodes
    StartNodes(StartNodesArgs),

    /// Stop and remove test nodes
    StopNodes(StopNodesArgs),

    /// Run an administration command
    Administer(AdministerArgs),

    /// Deploy a fragment to running nodes
    DeployFragment(DeployFragmentArgs),
}

#[derive(Clone, Debug, Args)]
pub struct InstallProductArgs {
    /// Directory the product is installed into
    #[arg(long, env = "TESTBED_PRODUCT_HOME")]
    pub product_home: PathBuf,

    /// Markers directory, relative to the product home
    #[arg(
        long,
        default_value = "installation-markers",
        env = "TESTBED_MARKERS_DIRECTORY"
    )]
    pub markers_directory: PathBuf,

    /// Files whose presence means the product was installed manually
    #[arg(long = "validation-file", env = "TESTBED_VALIDATION_FILES", value_delimiter = ',')]
    pub validation_files: Vec<PathBuf>,

    /// Product archives (tar or gzip-compressed tar)
    #[arg(required = true)]
    pub archives: Vec<PathBuf>,
}

#[derive(Clone, Debug, Args)]
pub struct ClusterArgs {
    /// Directory the product is installed in
    #[arg(long, env = "TESTBED_PRODUCT_HOME")]
    pub product_home: PathBuf,

    /// Cluster the nodes belong to
    #[arg(long, env = "TESTBED_CLUSTER_NAME")]
    pub cluster_name: String,

    /// Directory holding the node directories
    #[arg(long, default_value = "target/test-nodes", env = "TESTBED_NODE_DIRECTORY")]
    pub node_directory: PathBuf,

    /// Hosts to contact for discovery
    #[arg(long, env = "TESTBED_DISCOVERY_HOSTS", value_delimiter = ',')]
    pub discovery_hosts: Vec<String>,

    /// Discovery port; allocated when absent
    #[arg(long, env = "TESTBED_DISCOVERY_PORT")]
    pub discovery_port: Option<u16>,

    /// File remembering an allocated discovery port
    #[arg(
        long,
        default_value = "target/discovery.port",
        env = "TESTBED_DISCOVERY_PORT_FILE"
    )]
    pub discovery_port_file: PathBuf,

    /// User name for authentication
    #[arg(long, env = "TESTBED_USER_NAME")]
    pub user_name: Option<String>,

    /// Password for authentication
    #[arg(long, env = "TESTBED_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Environment for administration commands, as NAME=VALUE
    #[arg(long = "environment", env = "TESTBED_ENVIRONMENT", value_delimiter = ',')]
    pub environment: Vec<String>,

    /// Admin tool to run instead of the product's
    #[arg(long, env = "TESTBED_ADMIN_EXECUTABLE")]
    pub admin_executable: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum BuildTypeArg {
    Development,
    Production,
    #[default]
    All,
    Testcov,
}

impl From<BuildTypeArg> for BuildType {
    fn from(build_type: BuildTypeArg) -> Self {
        match build_type {
            BuildTypeArg::Development => Self::Development,
            BuildTypeArg::Production => Self::Production,
            BuildTypeArg::All => Self::All,
            BuildTypeArg::Testcov => Self::TestCoverage,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct StartNodesArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Nodes to start
    #[arg(long, default_value = "A", env = "TESTBED_NODES", value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Build type the nodes are installed with
    #[arg(long, value_enum, default_value_t, env = "TESTBED_BUILD_TYPE")]
    pub build_type: BuildTypeArg,

    /// Install parameter, as NAME=VALUE
    #[arg(long = "install-argument")]
    pub install_arguments: Vec<String>,

    /// Start parameter, as NAME=VALUE
    #[arg(long = "start-argument")]
    pub start_arguments: Vec<String>,

    /// Start nodes that are already installed
    #[arg(long, env = "TESTBED_SKIP_INSTALL")]
    pub skip_install: bool,

    /// Install the nodes without starting them
    #[arg(long, env = "TESTBED_INSTALL_ONLY")]
    pub install_only: bool,

    /// Do nothing
    #[arg(long, env = "TESTBED_SKIP_START")]
    pub skip_start: bool,
}

#[derive(Clone, Debug, Args)]
pub struct StopNodesArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Nodes to stop; the whole cluster when absent
    #[arg(long, env = "TESTBED_NODES", value_delimiter = ',')]
    pub nodes: Option<Vec<String>>,

    /// Remove the node installed at this path instead
    #[arg(long, env = "TESTBED_INSTALL_PATH")]
    pub install_path: Option<PathBuf>,

    /// Ignore failures, as when cleaning up
    #[arg(long, env = "TESTBED_CLEAN")]
    pub clean: bool,

    /// Do not stop the nodes
    #[arg(long, env = "TESTBED_SKIP_STOP")]
    pub skip_stop: bool,

    /// Do not remove the nodes
    #[arg(long, env = "TESTBED_SKIP_REMOVE")]
    pub skip_remove: bool,
}

#[derive(Clone, Debug, Args)]
pub struct AdministerArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Service to address; the cluster when neither this nor an admin port
    /// is given
    #[arg(long, conflicts_with = "admin_port")]
    pub service_name: Option<String>,

    /// Administration port to address
    #[arg(long)]
    pub admin_port: Option<u16>,

    /// Host of the administration port
    #[arg(long, requires = "admin_port")]
    pub host_name: Option<String>,

    /// Command verb, e.g. display
    pub command: String,

    /// Command target, e.g. node
    pub target: String,

    /// Command parameters, as NAME=VALUE
    pub arguments: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum FragmentTypeArg {
    #[default]
    Java,
    Eventflow,
    Liveview,
}

impl From<FragmentTypeArg> for FragmentType {
    fn from(fragment_type: FragmentTypeArg) -> Self {
        match fragment_type {
            FragmentTypeArg::Java => Self::Java,
            FragmentTypeArg::Eventflow => Self::EventFlow,
            FragmentTypeArg::Liveview => Self::LiveView,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct DeployFragmentArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Service to deploy to; the cluster by default
    #[arg(long)]
    pub service_name: Option<String>,

    /// Kind of fragment
    #[arg(long, value_enum, default_value_t)]
    pub fragment_type: FragmentTypeArg,

    /// Option for the process hosting the fragment
    #[arg(long = "execution-option", allow_hyphen_values = true)]
    pub execution_options: Vec<String>,

    /// EventFlow source directory
    #[arg(long = "eventflow-directory")]
    pub eventflow_directories: Vec<PathBuf>,

    /// LiveView project directory
    #[arg(long)]
    pub liveview_directory: Option<PathBuf>,

    /// Deploy parameter, as NAME=VALUE
    #[arg(long = "deploy-argument")]
    pub deploy_arguments: Vec<String>,

    /// Return once the deployment is dispatched
    #[arg(long)]
    pub detach: bool,

    /// Fragment to deploy
    pub target: String,

    /// Arguments for the application's entry point
    #[arg(last = true)]
    pub application_arguments: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_nodes_defaults() {
        let cli = Cli::try_parse_from([
            "testbed",
            "start-nodes",
            "--product-home",
            "/opt/product",
            "--cluster-name",
            "sample",
            "--install-argument",
            "application=app.zip",
        ])
        .unwrap();

        let Goal::StartNodes(args) = cli.goal else {
            panic!("expected start-nodes");
        };
        assert_eq!(args.nodes, vec!["A".to_string()]);
        assert_eq!(args.cluster.node_directory, PathBuf::from("target/test-nodes"));
        assert_eq!(
            args.cluster.discovery_port_file,
            PathBuf::from("target/discovery.port")
        );
        assert_eq!(args.install_arguments, vec!["application=app.zip".to_string()]);
        assert!(matches!(args.build_type, BuildTypeArg::All));
    }

    #[test]
    fn test_administer_by_admin_port() {
        let cli = Cli::try_parse_from([
            "testbed",
            "administer",
            "--product-home",
            "/opt/product",
            "--cluster-name",
            "sample",
            "--admin-port",
            "2000",
            "--host-name",
            "localhost",
            "display",
            "node",
            "verbose=true",
        ])
        .unwrap();

        let Goal::Administer(args) = cli.goal else {
            panic!("expected administer");
        };
        assert_eq!(args.admin_port, Some(2000));
        assert_eq!(args.command, "display");
        assert_eq!(args.arguments, vec!["verbose=true".to_string()]);
    }
}
