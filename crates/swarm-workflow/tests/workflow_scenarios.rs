//! End-to-end scenarios exercising `run_workflow` through its public API.

use std::sync::Arc;

use persistence_core::{MemoryStore, PersistenceStore, Plan, TaskDefinition};
use swarm_workflow::{run_workflow, MockTextGenClient, WorkflowConfig};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn three_task_linear_plan_executes_in_order() {
    let planner_client = Arc::new(MockTextGenClient::new([
        r#"[
            {"name":"outline","description":"draft an outline","promptTemplate":"Outline: {{user_request}}"},
            {"name":"draft","description":"expand the outline","promptTemplate":"Draft from: {{outline}}"},
            {"name":"polish","description":"polish the draft","promptTemplate":"Polish: {{prev_output}}"}
        ]"#,
    ]));
    let worker_client = Arc::new(MockTextGenClient::new([
        "outline-text",
        "draft-text",
        "polished-text",
    ]));
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());

    let outcomes = run_workflow(
        "wf-linear",
        "write a short story",
        planner_client,
        worker_client,
        store.clone(),
        &WorkflowConfig::for_tests(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        outcomes.iter().map(|o| o.task_name.as_str()).collect::<Vec<_>>(),
        vec!["outline", "draft", "polish"]
    );
    assert!(outcomes.iter().all(|o| o.result.success));
    assert_eq!(outcomes[2].result.output, "polished-text");

    let saved = store.load_task_outputs("wf-linear").await.unwrap();
    assert_eq!(saved.len(), 3);
}

#[tokio::test]
async fn diamond_plan_resolves_dependencies_and_pins_prev_output_to_plan_order() {
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
    store
        .save_plan(
            "wf-diamond",
            &Plan::new(vec![
                TaskDefinition::new("research", "gather facts", "{{user_request}}"),
                TaskDefinition::new("pros", "list pros", "{{research}}"),
                TaskDefinition::new("cons", "list cons", "{{research}}"),
                TaskDefinition::new("summary", "combine", "{{prev_output}}"),
            ]),
        )
        .await
        .unwrap();

    let planner_client = Arc::new(MockTextGenClient::new(Vec::<String>::new()));
    let worker_client = Arc::new(MockTextGenClient::new([
        "research-out",
        "pros-out",
        "cons-out",
        "summary-out",
    ]));

    let outcomes = run_workflow(
        "wf-diamond",
        "evaluate a proposal",
        planner_client,
        worker_client,
        store,
        &WorkflowConfig::for_tests(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes.last().unwrap().task_name, "summary");
    assert!(outcomes.iter().all(|o| o.result.success));
}

#[tokio::test]
async fn resuming_a_partially_completed_workflow_skips_finished_tasks() {
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
    let plan = Plan::new(vec![
        TaskDefinition::new("a", "first", "{{user_request}}"),
        TaskDefinition::new("b", "second", "{{a}}"),
        TaskDefinition::new("c", "third", "{{b}}"),
    ]);
    store.save_plan("wf-resume-e2e", &plan).await.unwrap();
    store.save_task_output("wf-resume-e2e", "a", "a-out").await.unwrap();
    store.save_task_output("wf-resume-e2e", "b", "b-out").await.unwrap();

    // No canned planner responses: if the plan were re-requested this test
    // would fail with an exhausted-mock error, proving resumption reused it.
    let planner_client = Arc::new(MockTextGenClient::new(Vec::<String>::new()));
    let worker_client = Arc::new(MockTextGenClient::new(["c-out"]));

    let outcomes = run_workflow(
        "wf-resume-e2e",
        "irrelevant on resume",
        planner_client,
        worker_client,
        store,
        &WorkflowConfig::for_tests(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].result.output, "a-out");
    assert_eq!(outcomes[1].result.output, "b-out");
    assert_eq!(outcomes[2].result.output, "c-out");
}

#[tokio::test]
async fn cycle_in_plan_surfaces_as_dependency_cycle_error() {
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
    store
        .save_plan(
            "wf-cycle",
            &Plan::new(vec![
                TaskDefinition::new("a", "first", "{{b}}"),
                TaskDefinition::new("b", "second", "{{a}}"),
            ]),
        )
        .await
        .unwrap();

    let planner_client = Arc::new(MockTextGenClient::new(Vec::<String>::new()));
    let worker_client = Arc::new(MockTextGenClient::new(Vec::<String>::new()));

    let err = run_workflow(
        "wf-cycle",
        "irrelevant",
        planner_client,
        worker_client,
        store,
        &WorkflowConfig::for_tests(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, swarm_workflow::WorkflowError::DependencyCycle(_)));
}
