//! Integration tests for the deployment pipeline.

mod common;

use std::sync::Arc;

use common::fixtures::PlanSwappingClient;
use common::{container_target, runtime_target, TestRun};
use nimbus_control::client::OperationBehaviour;
use nimbus_control::naming::validate;
use nimbus_control::{
    AppRef, Capability, DeployError, MemoryClient, OperationKind, Orchestrator, ResourceKind, Step,
};
use rstest::rstest;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test(start_paused = true)]
async fn second_app_reuses_first_apps_plan() {
    let run = TestRun::new();

    let report = Orchestrator::new(run.client.clone(), run.config.clone())
        .with_name_generator(TestRun::names())
        .run()
        .await
        .unwrap();

    assert_eq!(run.client.plans_created(), 1);
    assert_eq!(run.client.calls_to(Capability::CreateOrGetHostingPlan), 1);

    let group = &report.names.resource_group;
    let primary = run
        .client
        .app(&AppRef::new(group.clone(), report.names.primary_app.clone()))
        .unwrap();
    let secondary = run
        .client
        .app(&AppRef::new(group.clone(), report.names.secondary_app.clone()))
        .unwrap();

    assert_eq!(primary.plan_id, report.plan_id);
    assert_eq!(secondary.plan_id, primary.plan_id);
    assert_eq!(secondary.resource_group, primary.resource_group);
}

#[tokio::test(start_paused = true)]
async fn generated_names_are_distinct_and_valid() {
    let run = TestRun::new();

    let report = Orchestrator::new(run.client.clone(), run.config.clone())
        .run()
        .await
        .unwrap();

    let names = &report.names;
    assert_ne!(names.primary_app, names.secondary_app);
    assert!(names.primary_app.starts_with("fnapp1-"));
    assert!(names.secondary_app.starts_with("fnapp2-"));
    assert!(names.resource_group.starts_with("rgfn_"));
    assert_eq!(names.primary_app.len(), run.config.naming.app_name_max_len);
    for name in [&names.primary_app, &names.secondary_app] {
        validate(ResourceKind::FunctionApp, name).unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn switches_change_only_the_deployment_source() {
    let run = TestRun::new();
    let runtime_before = run.client.app(&runtime_target()).unwrap();
    let container_before = run.client.app(&container_target()).unwrap();

    Orchestrator::new(run.client.clone(), run.config.clone())
        .run()
        .await
        .unwrap();

    let runtime_after = run.client.app(&runtime_target()).unwrap();
    assert_eq!(runtime_after.plan_id, runtime_before.plan_id);
    assert_eq!(runtime_after.resource_group, runtime_before.resource_group);
    assert_eq!(runtime_after.runtime.as_ref(), Some(&run.config.runtime_switch));

    let container_after = run.client.app(&container_target()).unwrap();
    assert_eq!(container_after.plan_id, container_before.plan_id);
    assert_eq!(container_after.resource_group, container_before.resource_group);
    assert_eq!(container_after.container_image, run.config.container.image);
}

#[rstest]
#[case::create_group(Capability::CreateResourceGroup, Step::CreatePrimaryApp)]
#[case::create_plan(Capability::CreateOrGetHostingPlan, Step::CreatePrimaryApp)]
#[case::create_app(Capability::CreateFunctionApp, Step::CreatePrimaryApp)]
#[case::deploy(Capability::DeployArchive, Step::ZipDeploySecondary)]
#[case::poll(Capability::OperationStatus, Step::ZipDeploySecondary)]
#[case::lookup(Capability::GetFunctionAppByName, Step::ZipDeployExisting)]
#[case::runtime(Capability::SetRuntimeStack, Step::SwitchRuntime)]
#[case::container(Capability::SetContainerImage, Step::SwitchContainer)]
#[tokio::test(start_paused = true)]
async fn failure_aborts_remaining_steps(#[case] failing: Capability, #[case] expected: Step) {
    let run = TestRun::with_client(|client| client.failing(failing, "injected"));

    let failure = Orchestrator::new(run.client.clone(), run.config.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.step, expected);
    assert!(failure
        .to_string()
        .starts_with(&format!("step {} ({})", expected.number(), expected.as_str())));

    let later: Vec<Capability> = match expected {
        Step::CreatePrimaryApp => vec![Capability::DeployArchive, Capability::SetRuntimeStack],
        Step::ZipDeploySecondary | Step::ZipDeployExisting => {
            vec![Capability::SetRuntimeStack, Capability::SetContainerImage]
        }
        Step::SwitchRuntime => vec![Capability::SetContainerImage],
        _ => vec![],
    };
    for capability in later {
        assert_eq!(run.client.calls_to(capability), 0, "{capability} ran after abort");
    }
}

#[tokio::test(start_paused = true)]
async fn plan_mismatch_fails_secondary_step() {
    let run = TestRun::new();
    let client = Arc::new(PlanSwappingClient::new(run.client.clone()));

    let failure = Orchestrator::new(client, run.config.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.step, Step::CreateSecondaryApp);
    assert!(matches!(failure.error, DeployError::ResourceCreation { .. }));
    assert_eq!(run.client.calls_to(Capability::DeployArchive), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_deploy_times_out() {
    let run = TestRun::with_client(|client| {
        client.with_behaviour(OperationKind::ZipDeploy, OperationBehaviour::Never)
    });

    let failure = Orchestrator::new(run.client.clone(), run.config.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.step, Step::ZipDeploySecondary);
    assert!(failure.error.is_timeout());
    assert!(matches!(
        failure.error,
        DeployError::DeploymentTimeout {
            operation: OperationKind::ZipDeploy,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn reported_failure_is_not_a_timeout() {
    let run = TestRun::with_client(|client| {
        client.with_behaviour(
            OperationKind::RuntimeSwitch,
            OperationBehaviour::FailAfter(2, "stack not supported".to_owned()),
        )
    });

    let failure = Orchestrator::new(run.client.clone(), run.config.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.step, Step::SwitchRuntime);
    assert!(!failure.error.is_timeout());
    assert!(
        matches!(failure.error, DeployError::RuntimeSwitch { ref reason, .. } if reason == "stack not supported")
    );
}

#[tokio::test(start_paused = true)]
async fn created_groups_are_deleted_after_failure_when_enabled() {
    let mut config = common::test_config();
    config.cleanup.delete_created = true;
    let run = TestRun::with_config(config);
    let client = Arc::new(
        MemoryClient::seeded_from(&run.config)
            .failing(Capability::SetContainerImage, "quota exceeded"),
    );

    let before = client.resource_groups();
    let failure = Orchestrator::new(client.clone(), run.config.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.step, Step::SwitchContainer);
    assert_eq!(client.calls_to(Capability::DeleteResourceGroup), 1);
    assert_eq!(client.resource_groups(), before);
}

#[tokio::test(start_paused = true)]
async fn nothing_to_clean_up_when_names_fail() {
    let mut config = common::test_config();
    config.cleanup.delete_created = true;
    config.naming.resource_group_prefix = "bad/prefix".to_owned();
    let run = TestRun::with_config(config);

    let failure = Orchestrator::new(run.client.clone(), run.config.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.step, Step::GenerateNames);
    assert_eq!(run.client.calls_to(Capability::DeleteResourceGroup), 0);
}

#[tokio::test]
async fn smoke_test_squares_926() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/square"))
        .and(body_string("926"))
        .respond_with(ResponseTemplate::new(200).set_body_string("857476"))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = common::test_config();
    config.smoke_test.enabled = true;
    let host = server
        .uri()
        .trim_start_matches("http://")
        .to_owned();
    let run = TestRun {
        client: Arc::new(MemoryClient::seeded_from(&config).with_default_host(host)),
        config,
    };

    let report = Orchestrator::new(run.client.clone(), run.config.clone())
        .run()
        .await
        .unwrap();

    let smoke = report.smoke.unwrap();
    assert_eq!(smoke.response, "857476");
    assert_eq!(report.outcomes.len(), Step::ALL.len());
}

#[tokio::test]
async fn wrong_smoke_answer_fails_deploy_step() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("926"))
        .mount(&server)
        .await;

    let mut config = common::test_config();
    config.smoke_test.enabled = true;
    let host = server.uri().trim_start_matches("http://").to_owned();
    let client = Arc::new(MemoryClient::seeded_from(&config).with_default_host(host));

    let failure = Orchestrator::new(client.clone(), config)
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.step, Step::ZipDeploySecondary);
    assert!(matches!(failure.error, DeployError::SmokeTest(_)));
    assert_eq!(client.calls_to(Capability::GetFunctionAppByName), 0);
}
