//! Full runs through the etl-swarm provider layer with canned model replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::events::EventFilter;
use coordination::{
    AgentInvoker, AgentRole, CapabilityError, EventBus, InvocationExtra, InvocationOutput,
    PipelineState, RefinementPolicy, RoleBindings, RoundController, RoundPhase, TerminalReason,
    VoterPanel,
};
use etl_swarm::config::{Endpoint, SwarmConfig};
use etl_swarm::providers::{build_bindings, interpret_reply, PanelInvoker};
use etl_swarm::telemetry::{read_events, spawn_event_log, write_run_result};

/// Replies the way a well-behaved model would, as raw text.
struct CannedModel {
    vote: &'static str,
}

impl CannedModel {
    fn reply(&self, role: AgentRole) -> String {
        match role {
            AgentRole::PromptRefinement => {
                r#"{"step_name": "refine_prompt", "rationale": "Load orders.csv, drop duplicate order_id rows, write revenue per day to parquet."}"#.into()
            }
            AgentRole::Ingestion => "```json\n{\"step_name\": \"ingest_orders\", \"code_snippet\": \"df = pd.read_csv('orders.csv')\", \"rationale\": \"load raw orders\", \"output_file_path\": \"out/raw.parquet\", \"output_format\": \"parquet\"}\n```".into(),
            AgentRole::Cleaning => r#"Cleaning step follows. {"step_name": "clean_orders", "code_snippet": "df.drop_duplicates('order_id')", "rationale": "deduplicate orders", "output_file_path": "out/clean.parquet", "output_format": "parquet"}"#.into(),
            AgentRole::Transformation => r#"{"step_name": "daily_revenue", "code_snippet": "df.groupby('day').sum()", "rationale": "aggregate revenue per day", "output_file_path": "out/revenue.parquet", "output_format": "parquet"}"#.into(),
            AgentRole::ValidationVote => self.vote.into(),
            AgentRole::GapResolution => r#"{"step_name": "fix", "code_snippet": "pass", "rationale": "fix"}"#.into(),
        }
    }
}

#[async_trait]
impl AgentInvoker for CannedModel {
    fn provider(&self) -> &str {
        "canned"
    }

    async fn invoke(
        &self,
        role: AgentRole,
        _state: &PipelineState,
        _extra: &InvocationExtra,
    ) -> Result<InvocationOutput, CapabilityError> {
        interpret_reply(role, self.reply(role))
    }
}

fn canned_bindings() -> RoleBindings {
    let producer: Arc<dyn AgentInvoker> = Arc::new(CannedModel { vote: "" });
    let accept: Arc<dyn AgentInvoker> = Arc::new(CannedModel {
        vote: "VOTE: accept\nAll requested steps are present.",
    });
    let reject: Arc<dyn AgentInvoker> = Arc::new(CannedModel {
        vote: "VOTE: reject\nMissing currency normalization.",
    });
    let panel = PanelInvoker::new(accept).with_voter("voter-3", reject);

    let mut bindings = RoleBindings::new();
    for role in AgentRole::ALL {
        bindings.insert(role, producer.clone());
    }
    bindings.insert(AgentRole::ValidationVote, Arc::new(panel));
    bindings
}

#[tokio::test]
async fn test_canned_run_accepts_with_two_of_three() {
    let dir = tempfile::tempdir().unwrap();
    let events_path = dir.path().join("events.jsonl");
    let result_path = dir.path().join("run.json");

    let state = PipelineState::new("Aggregate daily revenue from orders.csv").with_artifact("orders.csv", "csv");
    let bus = EventBus::new().shared();
    let log = spawn_event_log(&bus, events_path.clone(), EventFilter::new().run(&state.run_id));
    let controller = RoundController::new(RefinementPolicy::default(), canned_bindings(), VoterPanel::default())
        .unwrap()
        .with_event_bus(bus.clone());

    let report = controller.run(state).await;

    assert_eq!(report.result.terminal_reason, TerminalReason::Accepted);
    assert!(report.result.consensus_reached);
    assert_eq!(report.result.rounds_used, 1);
    assert_eq!(
        report.state.refined_task,
        "Load orders.csv, drop duplicate order_id rows, write revenue per day to parquet."
    );

    let names: Vec<_> = report.result.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["refine_prompt", "ingest_orders", "clean_orders", "daily_revenue"]);
    assert_eq!(report.result.steps[1].input_path.as_deref(), Some("orders.csv"));
    assert_eq!(report.result.steps[2].input_path.as_deref(), Some("out/raw.parquet"));
    assert_eq!(report.result.steps[3].input_path.as_deref(), Some("out/clean.parquet"));

    assert_eq!(log.await.unwrap(), 4);
    let phases: Vec<_> = read_events(&events_path).unwrap().into_iter().map(|e| e.phase).collect();
    assert_eq!(
        phases,
        vec![RoundPhase::Init, RoundPhase::AgentChain, RoundPhase::Validate, RoundPhase::Accepted]
    );

    write_run_result(&report.result, &result_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&result_path).unwrap()).unwrap();
    assert_eq!(json["terminal_reason"]["kind"], "accepted");
    assert_eq!(json["steps"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_unreachable_endpoint_exhausts_without_aborting() {
    let mut config = SwarmConfig::default();
    config.endpoint = Endpoint {
        url: "http://127.0.0.1:1/v1".into(),
        model: "offline".into(),
        api_key: None,
        temperature: 0.0,
    };
    config.roles.clear();
    config.voters.iter_mut().for_each(|v| v.endpoint = None);
    config.http_timeout_secs = 5;
    config.policy.max_rounds = 1;
    config.policy.call_timeout_ms = 10_000;
    config.policy.timeout_retries = 0;

    let (bindings, panel) = build_bindings(&config).unwrap();
    let controller = RoundController::new(config.policy.clone(), bindings, panel).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(60), controller.run(PipelineState::new("t")))
        .await
        .unwrap();

    assert_eq!(report.result.terminal_reason, TerminalReason::Exhausted);
    assert!(report.result.steps.is_empty());
    assert_eq!(report.result.rounds_used, 1);
}
