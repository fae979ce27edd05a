use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use futures::FutureExt;
use testbed_admin::{
    Address, AdminService, Command, Destination, DestinationExt, DestinationOptions, Parameters,
};
use testbed_admin_mock::{MockAdminService, Reply};
use testbed_runner::{
    BoxError, Cleanup, CommandOutcome, CommandRunner, Error, ErrorHandler, ErrorHandling, RunOptions,
    ShutdownHooks,
};

fn setup() -> (MockAdminService, Arc<dyn Destination>, CommandRunner) {
    let admin = MockAdminService::new();
    let context = admin.new_context(Path::new("/opt/product"));
    let destination = admin
        .new_destination(
            context,
            DestinationOptions::new(Address::Service("A.cluster".to_string())),
        )
        .unwrap();
    let runner = CommandRunner::new(Arc::new(ShutdownHooks::new()));

    (admin, destination, runner)
}

fn counting_cleanup(calls: Arc<AtomicUsize>) -> Cleanup {
    Arc::new(move |_command: Arc<dyn Command>| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), BoxError>("node already gone".into())
        }
        .boxed()
    })
}

#[tokio::test]
async fn test_successful_run_records_output() {
    let (admin, destination, runner) = setup();
    admin.upon("install", "node", |_| {
        Ok(Reply::success().with_output(["Installing node", "Administration port is 2000"]))
    });

    let builder = destination.new_command("install", "node");
    let outcome = runner
        .run(
            &builder,
            Parameters::new(),
            RunOptions::default().record_output(true),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code(), Some(0));
    assert_eq!(outcome.location(), "A.cluster");
    assert_eq!(
        outcome.output().unwrap(),
        "Installing node\nAdministration port is 2000\n"
    );
}

#[tokio::test]
async fn test_failure_names_command_and_location() {
    let (admin, destination, runner) = setup();
    admin.upon("start", "node", |_| Ok(Reply::exit(2)));

    let error = runner
        .run(
            &destination.new_command("start", "node"),
            Parameters::new(),
            RunOptions::default(),
        )
        .await
        .unwrap_err();

    assert_matches!(error, Error::CommandFailed { exit_code: 2, .. });
    assert_eq!(
        error.to_string(),
        "Command: start node failed: A.cluster error code 2"
    );
}

#[tokio::test]
async fn test_ignored_failure_succeeds() {
    let (admin, destination, runner) = setup();
    admin.upon("stop", "node", |_| Ok(Reply::exit(1)));

    let outcome = runner
        .run(
            &destination.new_command("stop", "node"),
            Parameters::new(),
            RunOptions::default().error_handling(ErrorHandling::Ignore),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code(), Some(1));
}

#[tokio::test]
async fn test_custom_error_handler() {
    let (admin, destination, runner) = setup();
    admin.upon("remove", "node", |_| Ok(Reply::exit(4)));

    let seen = Arc::new(AtomicUsize::new(0));
    let handler: ErrorHandler = {
        let seen = seen.clone();
        Arc::new(move |outcome: &CommandOutcome, exit_code: i32| {
            seen.store(usize::try_from(exit_code).unwrap(), Ordering::SeqCst);
            Err(Error::Rejected(format!(
                "{} refused removal",
                outcome.location()
            )))
        })
    };

    let error = runner
        .run(
            &destination.new_command("remove", "node"),
            Parameters::new(),
            RunOptions::default().on_error(handler),
        )
        .await
        .unwrap_err();

    assert_matches!(error, Error::Rejected(message) if message == "A.cluster refused removal");
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_illegal_argument_deregisters_hook() {
    let (admin, destination, runner) = setup();
    admin.upon("install", "node", |_| Err("unknown parameter".to_string()));

    let error = runner
        .run(
            &destination.new_command("install", "node"),
            Parameters::new(),
            RunOptions::default().cleanup(counting_cleanup(Arc::new(AtomicUsize::new(0)))),
        )
        .await
        .unwrap_err();

    assert_matches!(error, Error::IllegalArgument { .. });
    assert!(runner.hooks().is_empty());
}

#[tokio::test]
async fn test_completed_run_deregisters_hook() {
    let (_admin, destination, runner) = setup();
    let calls = Arc::new(AtomicUsize::new(0));

    runner
        .run(
            &destination.new_command("install", "node"),
            Parameters::new(),
            RunOptions::default().cleanup(counting_cleanup(calls.clone())),
        )
        .await
        .unwrap();

    assert!(runner.hooks().is_empty());

    runner.hooks().run_all().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_detached_run_keeps_hook() {
    let (admin, destination, runner) = setup();
    admin.upon("deploy", "app.jar", |_| Ok(Reply::until_cancelled()));

    let outcome = runner
        .run(
            &destination.new_command("deploy", "app.jar"),
            Parameters::new(),
            RunOptions::default()
                .wait(false)
                .cleanup(counting_cleanup(Arc::new(AtomicUsize::new(0)))),
        )
        .await
        .unwrap();

    assert!(outcome.is_detached());
    assert_eq!(runner.hooks().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_aborts_and_cleans_up() {
    let (admin, destination, runner) = setup();
    admin.upon("install", "node", |_| Ok(Reply::until_cancelled()));
    let calls = Arc::new(AtomicUsize::new(0));

    let run = {
        let runner = runner.clone();
        let builder = destination.new_command("install", "node");
        let cleanup = counting_cleanup(calls.clone());
        tokio::spawn(async move {
            runner
                .run(&builder, Parameters::new(), RunOptions::default().cleanup(cleanup))
                .await
        })
    };

    while admin.invocations().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The failing cleanup must not escape the shutdown handler.
    runner.hooks().run_all().await;

    assert_matches!(
        run.await.unwrap(),
        Err(Error::Aborted { command, target }) if command == "install" && target == "node"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        admin.cancellations(),
        vec![("install".to_string(), "node".to_string())]
    );
    assert!(runner.hooks().is_empty());
}
