mod harness;

use harness::{is_permission_error, sse_events, DaemonHarness};
use serde_json::Value;

macro_rules! spawn_or_skip {
    () => {
        match DaemonHarness::spawn().await {
            Ok(harness) => harness,
            Err(err) if is_permission_error(&err) => {
                eprintln!("Skipping integration test: socket bind not permitted");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    };
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_is_public_but_everything_else_needs_the_key() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();

    let status = daemon.unauthenticated("/status").send().await?;
    assert_eq!(status.status(), 200);
    assert_eq!(status.text().await?, "ok");

    let denied = daemon.unauthenticated("/sessions").send().await?;
    assert_eq!(denied.status(), 401);
    let body: Value = denied.json().await?;
    assert_eq!(
        body["message"],
        "Unauthorized - Invalid or missing API key"
    );

    let allowed = daemon.get("/sessions").send().await?;
    assert_eq!(allowed.status(), 200);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_reply_resume_round_trip() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();

    let session_id = daemon.start_agent("/tmp/w").await?;
    let body = daemon.reply(&session_id, "hi").await?;
    let events = sse_events(&body);

    // Frames are `data: <json>` with a type from the fixed set.
    let known = [
        "Message",
        "Error",
        "Finish",
        "ModelChange",
        "Notification",
        "UpdateConversation",
        "Ping",
    ];
    assert!(!events.is_empty());
    for event in &events {
        let event_type = event["type"].as_str().expect("event has a type");
        assert!(known.contains(&event_type), "unexpected type {}", event_type);
    }

    assert!(events.iter().any(|e| e["type"] == "Ping"));
    let message = events
        .iter()
        .find(|e| e["type"] == "Message")
        .expect("one Message event");
    assert_eq!(message["message"]["role"], "assistant");
    assert_eq!(message["message"]["content"][0]["type"], "text");

    let finishes: Vec<&Value> = events.iter().filter(|e| e["type"] == "Finish").collect();
    assert_eq!(finishes.len(), 1);
    assert_eq!(finishes[0]["reason"], "stop");

    let session: Value = daemon
        .get(&format!("/sessions/{}", session_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(session["conversation"].as_array().map(Vec::len), Some(2));
    assert_eq!(session["message_count"], 2);
    assert!(session["accumulated_total_tokens"].as_i64().unwrap_or(0) > 0);

    // Resume is idempotent and keeps serving the same session.
    let resumed = daemon
        .post("/agent/resume")
        .json(&serde_json::json!({"session_id": session_id, "load_model_and_extensions": true}))
        .send()
        .await?;
    assert_eq!(resumed.status(), 200);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accumulated_tokens_grow_across_turns() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();
    let session_id = daemon.start_agent("/tmp/w").await?;

    let mut last_accumulated = 0;
    for turn in 0..3 {
        daemon.reply(&session_id, "another message").await?;
        let session: Value = daemon
            .get(&format!("/sessions/{}", session_id))
            .send()
            .await?
            .json()
            .await?;
        let accumulated = session["accumulated_total_tokens"].as_i64().unwrap_or(0);
        assert!(
            accumulated >= last_accumulated,
            "turn {}: accumulated shrank from {} to {}",
            turn,
            last_accumulated,
            accumulated
        );
        last_accumulated = accumulated;

        let count = session["message_count"].as_u64().unwrap_or(0);
        let len = session["conversation"].as_array().map(Vec::len).unwrap_or(0);
        assert_eq!(count as usize, len);
    }
    assert!(last_accumulated > 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reply_validates_its_session() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();

    let missing = daemon
        .post("/reply")
        .json(&serde_json::json!({"messages": []}))
        .send()
        .await?;
    assert_eq!(missing.status(), 400);

    let unknown = daemon
        .post("/reply")
        .json(&serde_json::json!({"session_id": "no-such-session", "messages": []}))
        .send()
        .await?;
    assert_eq!(unknown.status(), 424);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fork_edit_copies_the_prefix_and_leaves_the_original() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();

    // Import a session with controlled timestamps.
    let conversation = serde_json::json!([
        {"role": "user", "created": 100, "content": [{"type": "text", "text": "U1"}],
         "metadata": {"userVisible": true, "agentVisible": true}},
        {"role": "assistant", "created": 101, "content": [{"type": "text", "text": "A1"}],
         "metadata": {"userVisible": true, "agentVisible": true}},
        {"role": "user", "created": 102, "content": [{"type": "text", "text": "U2"}],
         "metadata": {"userVisible": true, "agentVisible": true}},
        {"role": "assistant", "created": 103, "content": [{"type": "text", "text": "A2"}],
         "metadata": {"userVisible": true, "agentVisible": true}}
    ]);
    let session_json = serde_json::json!({
        "id": "replaced-on-import",
        "working_dir": "/tmp/w",
        "name": "forkable",
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z",
        "extension_data": {},
        "message_count": 4,
        "conversation": conversation
    });

    let imported: Value = daemon
        .post("/sessions/import")
        .json(&serde_json::json!({"json": session_json.to_string()}))
        .send()
        .await?
        .json()
        .await?;
    let original_id = imported["id"].as_str().expect("imported id").to_string();

    let forked: Value = daemon
        .post(&format!("/sessions/{}/edit_message", original_id))
        .json(&serde_json::json!({"timestamp": 102, "editType": "fork"}))
        .send()
        .await?
        .json()
        .await?;
    let fork_id = forked["sessionId"].as_str().expect("fork id").to_string();
    assert_ne!(fork_id, original_id);

    let fork: Value = daemon
        .get(&format!("/sessions/{}", fork_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(fork["message_count"], 2);
    let fork_convo = fork["conversation"].as_array().expect("fork conversation");
    assert_eq!(fork_convo.len(), 2);
    assert_eq!(fork_convo[0]["content"][0]["text"], "U1");
    assert_eq!(fork_convo[1]["content"][0]["text"], "A1");

    // The original is untouched.
    let original: Value = daemon
        .get(&format!("/sessions/{}", original_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(
        original["conversation"].as_array().map(Vec::len),
        Some(4)
    );

    // Edit-in-place truncates.
    daemon
        .post(&format!("/sessions/{}/edit_message", original_id))
        .json(&serde_json::json!({"timestamp": 103, "editType": "edit"}))
        .send()
        .await?
        .error_for_status()?;
    let truncated: Value = daemon
        .get(&format!("/sessions/{}", original_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(truncated["message_count"], 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_name_and_delete_lifecycle() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();
    let session_id = daemon.start_agent("/tmp/w").await?;

    let too_long = daemon
        .put(&format!("/sessions/{}/name", session_id))
        .json(&serde_json::json!({"name": "x".repeat(201)}))
        .send()
        .await?;
    assert_eq!(too_long.status(), 400);

    daemon
        .put(&format!("/sessions/{}/name", session_id))
        .json(&serde_json::json!({"name": "my chat"}))
        .send()
        .await?
        .error_for_status()?;
    let session: Value = daemon
        .get(&format!("/sessions/{}", session_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(session["name"], "my chat");
    assert_eq!(session["user_set_name"], true);

    let deleted = daemon
        .delete(&format!("/sessions/{}", session_id))
        .send()
        .await?;
    assert_eq!(deleted.status(), 200);
    let gone = daemon
        .get(&format!("/sessions/{}", session_id))
        .send()
        .await?;
    assert_eq!(gone.status(), 404);
    let gone_again = daemon
        .delete(&format!("/sessions/{}", session_id))
        .send()
        .await?;
    assert_eq!(gone_again.status(), 404);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn insights_track_sessions_and_tokens() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();
    let session_id = daemon.start_agent("/tmp/w").await?;
    daemon.reply(&session_id, "count my tokens").await?;

    let insights: Value = daemon.get("/sessions/insights").send().await?.json().await?;
    assert!(insights["totalSessions"].as_u64().unwrap_or(0) >= 1);
    assert!(insights["totalTokens"].as_i64().unwrap_or(0) > 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn todo_extension_dispatch_end_to_end() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();
    let session_id = daemon.start_agent("/tmp/w").await?;

    let added = daemon
        .post("/extensions")
        .json(&serde_json::json!({"type": "platform", "name": "todo", "description": "todos"}))
        .send()
        .await?;
    assert_eq!(added.status(), 201);

    let duplicate = daemon
        .post("/extensions")
        .json(&serde_json::json!({"type": "platform", "name": "todo"}))
        .send()
        .await?;
    assert_eq!(duplicate.status(), 409);

    let tools: Value = daemon
        .get(&format!("/agent/tools?session_id={}", session_id))
        .send()
        .await?
        .json()
        .await?;
    let names: Vec<&str> = tools
        .as_array()
        .expect("tool list")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"todo__add"), "missing todo__add in {:?}", names);

    let call: Value = daemon
        .post("/agent/call_tool")
        .json(&serde_json::json!({
            "session_id": session_id,
            "name": "todo__add",
            "arguments": {"content": "x"}
        }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(call["is_error"], false);

    let listing: Value = daemon
        .post("/agent/call_tool")
        .json(&serde_json::json!({
            "session_id": session_id,
            "name": "todo__list",
            "arguments": {}
        }))
        .send()
        .await?
        .json()
        .await?;
    assert!(listing["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .contains("x"));

    let removed = daemon.delete("/extensions/todo").send().await?;
    assert_eq!(removed.status(), 200);
    let missing = daemon.delete("/extensions/todo").send().await?;
    assert_eq!(missing.status(), 404);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schedule_lifecycle_with_run_now() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();

    let recipe_path = daemon.data_dir().join("report.yaml");
    std::fs::write(
        &recipe_path,
        "title: report\ndescription: daily report\nprompt: summarise the day\n",
    )?;
    let recipe_source = recipe_path.to_string_lossy().to_string();

    let created = daemon
        .post("/schedule/create")
        .json(&serde_json::json!({
            "id": "j1",
            "recipe_source": recipe_source,
            "cron": "0 0 1 1 *"
        }))
        .send()
        .await?;
    assert_eq!(created.status(), 201);
    let job: Value = created.json().await?;
    assert_eq!(job["id"], "j1");
    assert_eq!(job["currently_running"], false);

    let duplicate = daemon
        .post("/schedule/create")
        .json(&serde_json::json!({
            "id": "j1",
            "recipe_source": recipe_source,
            "cron": "0 0 1 1 *"
        }))
        .send()
        .await?;
    assert_eq!(duplicate.status(), 409);

    let bad_cron = daemon
        .post("/schedule/create")
        .json(&serde_json::json!({
            "id": "j2",
            "recipe_source": recipe_source,
            "cron": "definitely not cron"
        }))
        .send()
        .await?;
    assert_eq!(bad_cron.status(), 400);

    let listed: Value = daemon.get("/schedule/list").send().await?.json().await?;
    assert_eq!(listed["jobs"].as_array().map(Vec::len), Some(1));

    // run_now executes the recipe against the mock provider and records a
    // scheduled session.
    let run: Value = daemon
        .post("/schedule/j1/run_now")
        .send()
        .await?
        .json()
        .await?;
    let run_session = run["session_id"].as_str().expect("run session").to_string();

    let session: Value = daemon
        .get(&format!("/sessions/{}", run_session))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(session["session_type"], "scheduled");
    assert_eq!(session["schedule_id"], "j1");
    assert_eq!(session["name"], "report");

    let by_schedule: Value = daemon
        .get("/schedule/j1/sessions?limit=5")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(by_schedule.as_array().map(Vec::len), Some(1));

    // After the run, inspect reports nothing in flight.
    let inspect: Value = daemon
        .get("/schedule/j1/inspect")
        .send()
        .await?
        .json()
        .await?;
    assert!(inspect.get("session_id").is_none());
    assert!(inspect.get("process_start_time").is_none());

    let paused = daemon.post("/schedule/j1/pause").send().await?;
    assert_eq!(paused.status(), 204);
    let unpaused = daemon.post("/schedule/j1/unpause").send().await?;
    assert_eq!(unpaused.status(), 204);

    let updated = daemon
        .put("/schedule/j1")
        .json(&serde_json::json!({"cron": "*/5 * * * *"}))
        .send()
        .await?;
    assert_eq!(updated.status(), 200);
    let job: Value = updated.json().await?;
    assert_eq!(job["cron"], "*/5 * * * *");

    let deleted = daemon.delete("/schedule/delete/j1").send().await?;
    assert_eq!(deleted.status(), 204);
    let missing = daemon.get("/schedule/j1/inspect").send().await?;
    assert_eq!(missing.status(), 404);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_start_accepts_recipe_deeplinks() -> anyhow::Result<()> {
    use base64::Engine;
    use std::io::Write;

    let daemon = spawn_or_skip!();

    let recipe = serde_json::json!({
        "version": "1.0.0",
        "title": "linked",
        "description": "from a deeplink",
        "prompt": "do the thing"
    });
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(recipe.to_string().as_bytes())?;
    let deeplink = format!(
        "goose://recipe/{}",
        base64::engine::general_purpose::URL_SAFE.encode(encoder.finish()?)
    );

    let session: Value = daemon
        .post("/agent/start")
        .json(&serde_json::json!({"working_dir": "/tmp/w", "recipe_deeplink": deeplink}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(session["recipe"]["title"], "linked");
    assert_eq!(session["provider_name"], "mock");

    // No working_dir is a bad request.
    let bad = daemon
        .post("/agent/start")
        .json(&serde_json::json!({}))
        .send()
        .await?;
    assert_eq!(bad.status(), 400);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_provider_requires_a_live_agent() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();

    let inactive = daemon
        .post("/agent/update_provider")
        .json(&serde_json::json!({"session_id": "ghost", "provider": "mock"}))
        .send()
        .await?;
    assert_eq!(inactive.status(), 424);

    let session_id = daemon.start_agent("/tmp/w").await?;
    let updated = daemon
        .post("/agent/update_provider")
        .json(&serde_json::json!({
            "session_id": session_id,
            "provider": "mock",
            "model": "mock-model-v2"
        }))
        .send()
        .await?;
    assert_eq!(updated.status(), 200);

    let providers: Value = daemon.get("/config/providers").send().await?.json().await?;
    let names: Vec<&str> = providers
        .as_array()
        .expect("provider metadata")
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    for expected in ["anthropic", "azure_openai", "mock", "openai"] {
        assert!(names.contains(&expected), "{} missing from {:?}", expected, names);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn export_renders_readable_text() -> anyhow::Result<()> {
    let daemon = spawn_or_skip!();
    let session_id = daemon.start_agent("/tmp/w").await?;
    daemon.reply(&session_id, "export me").await?;

    let resp = daemon
        .get(&format!("/sessions/{}/export", session_id))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/plain"));
    let text = resp.text().await?;
    assert!(text.contains("## User"));
    assert!(text.contains("export me"));
    assert!(text.contains("## Assistant"));
    Ok(())
}
