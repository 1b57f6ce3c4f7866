//! Evaluator-side `/a2a` API: task generation, simulator sessions and
//! standalone video scoring.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use harness::core::actions::Action;
use harness::core::observation::{Observation, StepOutcome};
use harness::core::scoring::{extract, overall};
use harness::core::task::{Difficulty, TaskSpec, TaskType};
use harness::error::{HarnessError, ProtocolError};
use harness::registry::InitOutcome;
use harness::resolver::ResolvedTask;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{ApiError, blocking};
use crate::state::{AppState, EvaluatorServices};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/task/generate", post(generate_task))
        .route("/task/assign", post(assign_task))
        .route("/task/init", post(init_task))
        .route("/action", post(step))
        .route("/task/reset", post(reset_task))
        .route("/task/close", post(close_task))
        .route("/evaluate", post(evaluate))
        .route("/tasks", get(list_tasks))
        .route("/agents", get(list_agents))
}

fn services(state: &AppState) -> Result<Arc<EvaluatorServices>, ApiError> {
    state.services.clone().ok_or_else(|| {
        ApiError::from(HarnessError::NotSupported {
            operation: format!("session API on the {} role", state.role.as_str()),
        })
    })
}

fn missing_field(field: &str) -> HarnessError {
    HarnessError::from(ProtocolError::MissingField {
        field: field.to_string(),
    })
}

fn observation_json(observation: &Observation) -> Value {
    json!({
        "image": observation.image.as_ref().map(|bytes| STANDARD.encode(bytes)),
        "inventory": observation.inventory,
        "position": observation.position,
    })
}

fn task_json(task: &TaskSpec) -> Value {
    json!({
        "task_name": task.name,
        "task_description": task.description,
        "difficulty": task.difficulty,
        "thinking": task.thinking.clone().unwrap_or_default(),
        "custom_init_commands": task.init_commands,
    })
}

fn init_json(outcome: &InitOutcome, task: &TaskSpec, task_id: Option<&str>) -> Value {
    json!({
        "agent_id": outcome.agent_id,
        "task_name": task.name,
        "task_description": task.description,
        "task_id": task_id,
        "is_generated": task.generated,
        "record_dir": outcome.record_dir,
        "initial_observation": observation_json(&outcome.observation),
    })
}

const MAX_COMPOSED_TASKS: usize = 3;

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default = "atomic")]
    task_type: TaskType,
    #[serde(default)]
    difficulty: Difficulty,
    task_name: Option<String>,
    num_tasks: Option<usize>,
}

fn atomic() -> TaskType {
    TaskType::Atomic
}

/// POST /a2a/task/generate - generate and store a task config.
async fn generate_task(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    if !request.task_type.is_generated() {
        return Err(ApiError::from(HarnessError::from(ProtocolError::InvalidField {
            field: "task_type".to_string(),
            value: request.task_type.to_string(),
        })));
    }
    if let Some(count) = request.num_tasks
        && !(1..=MAX_COMPOSED_TASKS).contains(&count)
    {
        return Err(ApiError::from(HarnessError::from(ProtocolError::InvalidField {
            field: "num_tasks".to_string(),
            value: count.to_string(),
        })));
    }
    let task_type = request.task_type;
    let resolved = blocking(move || {
        services.resolver.generate(
            request.task_name.as_deref(),
            request.difficulty,
            task_type,
            request.num_tasks,
        )
    })
    .await?;
    let mut body = task_json(&resolved.spec);
    body["task_id"] = json!(resolved.id);
    body["task_type"] = json!(task_type);
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    agent_id: String,
    #[serde(default)]
    task_type: TaskType,
    #[serde(default)]
    difficulty: Difficulty,
    task_name: Option<String>,
}

/// POST /a2a/task/assign - resolve (or generate) a task and start a session.
async fn assign_task(
    State(state): State<AppState>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    let body = blocking(move || {
        let resolved = services.resolver.resolve(
            request.task_name.as_deref(),
            request.difficulty,
            request.task_type,
        )?;
        start_session(&services, Some(&request.agent_id), &resolved)
    })
    .await?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct InitRequest {
    agent_id: Option<String>,
    task_name: Option<String>,
    #[serde(default)]
    difficulty: Difficulty,
    task_id: Option<String>,
}

/// POST /a2a/task/init - start a session on a predefined or stored task.
async fn init_task(
    State(state): State<AppState>,
    Json(request): Json<InitRequest>,
) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    let body = blocking(move || {
        let resolved = match (&request.task_id, &request.task_name) {
            (Some(id), _) => ResolvedTask {
                id: Some(id.clone()),
                spec: services.resolver.resolve_generated(id)?,
                config_path: None,
            },
            (None, Some(name)) => services.resolver.load_predefined(name, request.difficulty)?,
            (None, None) => return Err(missing_field("task_name").into()),
        };
        start_session(&services, request.agent_id.as_deref(), &resolved)
    })
    .await?;
    Ok(Json(body))
}

fn start_session(
    services: &EvaluatorServices,
    agent_id: Option<&str>,
    resolved: &ResolvedTask,
) -> anyhow::Result<Value> {
    let outcome = services
        .registry
        .init(agent_id, Arc::clone(&resolved.spec))?;
    Ok(init_json(&outcome, &resolved.spec, resolved.id.as_deref()))
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    agent_id: String,
    #[serde(default)]
    action: Action,
}

/// POST /a2a/action - advance a session by one action.
async fn step(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    let outcome: StepOutcome =
        blocking(move || services.registry.step(&request.agent_id, &request.action)).await?;
    Ok(Json(json!({
        "observation": observation_json(&outcome.observation),
        "reward": outcome.reward,
        "terminated": outcome.terminated,
        "truncated": outcome.truncated,
        "info": outcome.info,
    })))
}

#[derive(Debug, Deserialize)]
struct AgentRequest {
    agent_id: String,
}

/// POST /a2a/task/reset - start the session's next episode.
async fn reset_task(
    State(state): State<AppState>,
    Json(request): Json<AgentRequest>,
) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    let body = blocking(move || {
        let reset = services.registry.reset(&request.agent_id)?;
        Ok(json!({
            "agent_id": request.agent_id,
            "episode": reset.episode,
            "observation": observation_json(&reset.observation),
        }))
    })
    .await?;
    Ok(Json(body))
}

/// POST /a2a/task/close - close a session and list its recordings.
async fn close_task(
    State(state): State<AppState>,
    Json(request): Json<AgentRequest>,
) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    let agent_id = request.agent_id.clone();
    let mut files = blocking(move || services.registry.close(&request.agent_id)).await?;
    let record_dir = files.pop();
    Ok(Json(json!({
        "agent_id": agent_id,
        "status": "closed",
        "video_files": files,
        "record_dir": record_dir,
    })))
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    task_name: String,
    video_base64: Option<String>,
    video_path: Option<PathBuf>,
}

/// POST /a2a/evaluate - score one video against a task's criteria.
async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    let body = blocking(move || {
        services.assessor.check_ready(&request.task_name)?;
        let feedback = match (&request.video_base64, &request.video_path) {
            (Some(encoded), _) => {
                let bytes = STANDARD.decode(encoded.trim()).map_err(|err| {
                    HarnessError::from(ProtocolError::InvalidField {
                        field: "video_base64".to_string(),
                        value: err.to_string(),
                    })
                })?;
                let mut upload = tempfile::Builder::new().suffix(".mp4").tempfile()?;
                upload.write_all(&bytes)?;
                upload.flush()?;
                services.assessor.assess(&request.task_name, upload.path())?
            }
            (None, Some(path)) => services.assessor.assess(&request.task_name, path)?,
            (None, None) => return Err(missing_field("video_base64").into()),
        };
        let scores = extract(&feedback, &services.metrics);
        Ok(json!({
            "task_name": request.task_name,
            "overall_score": overall(&scores),
            "scores": scores,
            "detailed_feedback": feedback,
        }))
    })
    .await?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct TasksQuery {
    difficulty: Option<Difficulty>,
}

/// GET /a2a/tasks - predefined tasks on disk.
async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    let tasks = blocking(move || services.resolver.list_tasks(query.difficulty)).await?;
    Ok(Json(json!({ "tasks": tasks })))
}

/// GET /a2a/agents - live sessions.
async fn list_agents(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let services = services(&state)?;
    let agents = blocking(move || Ok(services.registry.list())).await?;
    Ok(Json(json!({ "active_agents": agents })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use harness::io::config::HarnessConfig;
    use harness::test_support::{
        ScriptedAssessor, ScriptedCompletion, ScriptedSimulator, ScriptedTransport, task_workspace,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::card::load_card;
    use crate::routes::router;
    use crate::state::{EvaluatorParts, Role};

    const FEEDBACK: &str = "Task Progress: 9\nAction Control: 7\nCreative Attempts: 5";

    struct Fixture {
        app: Router,
        completion: Arc<ScriptedCompletion>,
        _workspace: TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedSimulator::new())
    }

    fn fixture_with(simulator: ScriptedSimulator) -> Fixture {
        let workspace = task_workspace(&[("collect_wood", Difficulty::Simple)]).expect("workspace");
        let root = workspace.path();
        let mut config = HarnessConfig::default();
        config.paths.task_configs_dir = root.join("task_configs");
        config.paths.criteria_dir = root.join("criteria_files");
        config.paths.generation_dir = root.join("task_generation");
        config.paths.output_dir = root.join("output");
        config.paths.recordings_dir = root.join("recordings");

        let completion = Arc::new(ScriptedCompletion::new());
        let state = AppState::evaluator(
            load_card(Role::Evaluator, "http://127.0.0.1:9001").expect("card"),
            EvaluatorParts {
                completion: completion.clone(),
                transport: Arc::new(ScriptedTransport::new(0)),
                assessor: Arc::new(ScriptedAssessor::new(FEEDBACK)),
                simulator: Arc::new(simulator),
            },
            &config,
        );
        Fixture {
            app: router(state),
            completion,
            _workspace: workspace,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_lifecycle_over_http() {
        let fixture = fixture();
        let app = &fixture.app;

        let (status, body) = send(
            app,
            "POST",
            "/a2a/task/init",
            Some(json!({"agent_id": "a1", "task_name": "collect_wood", "difficulty": "simple"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["agent_id"], "a1");
        assert_eq!(body["is_generated"], false);

        let (status, _) = send(
            app,
            "POST",
            "/a2a/task/init",
            Some(json!({"agent_id": "a1", "task_name": "collect_wood"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            app,
            "POST",
            "/a2a/action",
            Some(json!({"agent_id": "a1", "action": {"forward": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["observation"]["inventory"]["oak_log"], 1);
        assert_eq!(body["reward"], 1.0);

        let (_, body) = send(app, "POST", "/a2a/task/reset", Some(json!({"agent_id": "a1"}))).await;
        assert_eq!(body["episode"], 1);

        let (_, body) = send(app, "GET", "/a2a/agents", None).await;
        assert_eq!(body["active_agents"][0]["agent_id"], "a1");

        let (status, body) = send(app, "POST", "/a2a/task/close", Some(json!({"agent_id": "a1"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "closed");
        assert_eq!(body["video_files"].as_array().map(Vec::len), Some(2));

        let (status, body) = send(app, "POST", "/a2a/task/close", Some(json!({"agent_id": "a1"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("a1")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_predefined_task_is_404() {
        let fixture = fixture();
        let (status, body) = send(
            &fixture.app,
            "POST",
            "/a2a/task/init",
            Some(json!({"task_name": "fly_to_the_moon", "difficulty": "hard"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].is_string());

        let (status, _) = send(&fixture.app, "POST", "/a2a/task/init", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generated_task_can_be_assigned_by_id() {
        let fixture = fixture();
        fixture.completion.push_reply(
            "- Task description: Hunt a cow for leather\n\
             - custom_init_commands:\n  - /give @s minecraft:iron_sword\n",
        );
        let (status, generated) = send(
            &fixture.app,
            "POST",
            "/a2a/task/generate",
            Some(json!({"task_type": "atomic", "task_name": "hunt a cow"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{generated}");
        assert_eq!(generated["task_name"], "hunt_a_cow");
        assert_eq!(
            generated["custom_init_commands"],
            json!(["/give @s minecraft:iron_sword"])
        );
        let task_id = generated["task_id"].as_str().expect("task id").to_string();

        let (status, body) = send(
            &fixture.app,
            "POST",
            "/a2a/task/init",
            Some(json!({"task_id": task_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_generated"], true);
        assert_eq!(body["task_id"], task_id.as_str());
        assert!(body["agent_id"].as_str().is_some_and(|id| id.starts_with("agent_")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_is_not_held_up_by_another_agents_step() {
        let fixture =
            fixture_with(ScriptedSimulator::new().with_step_delay(Duration::from_millis(1500)));
        for agent_id in ["slow", "fast"] {
            let (status, body) = send(
                &fixture.app,
                "POST",
                "/a2a/task/init",
                Some(json!({"agent_id": agent_id, "task_name": "collect_wood"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }

        let app = fixture.app.clone();
        let stepping = tokio::spawn(async move {
            send(&app, "POST", "/a2a/action", Some(json!({"agent_id": "slow"}))).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let (status, body) =
            send(&fixture.app, "POST", "/a2a/task/reset", Some(json!({"agent_id": "fast"}))).await;
        let waited = started.elapsed();
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["episode"], 1);
        assert!(waited < Duration::from_millis(1000), "reset waited {waited:?}");

        let (status, _) = stepping.await.expect("join");
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn out_of_range_num_tasks_is_rejected() {
        let fixture = fixture();
        for num_tasks in [0, 4, 1_000_000_000] {
            let (status, body) = send(
                &fixture.app,
                "POST",
                "/a2a/task/generate",
                Some(json!({"task_type": "compositional", "num_tasks": num_tasks})),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert!(body["detail"].as_str().is_some_and(|detail| detail.contains("num_tasks")));
        }
        assert!(fixture.completion.requests().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unparsable_generation_is_bad_gateway() {
        let fixture = fixture();
        fixture.completion.push_reply("I would rather not.");
        let (status, _) = send(
            &fixture.app,
            "POST",
            "/a2a/task/generate",
            Some(json!({"task_type": "atomic", "task_name": "hunt a cow"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn evaluate_scores_uploaded_video() {
        let fixture = fixture();
        let (status, body) = send(
            &fixture.app,
            "POST",
            "/a2a/evaluate",
            Some(json!({
                "task_name": "collect_wood",
                "video_base64": STANDARD.encode(harness::io::mock_sim::PLACEHOLDER_MP4),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["scores"]["Task Progress"], 9);
        assert_eq!(body["overall_score"], 7.0);
        assert_eq!(body["detailed_feedback"], FEEDBACK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn task_listing_filters_by_difficulty() {
        let fixture = fixture();
        let (_, body) = send(&fixture.app, "GET", "/a2a/tasks", None).await;
        assert_eq!(body["tasks"], json!([{"name": "collect_wood", "difficulty": "simple"}]));

        let (_, body) = send(&fixture.app, "GET", "/a2a/tasks?difficulty=hard", None).await;
        assert_eq!(body["tasks"], json!([]));
    }
}
