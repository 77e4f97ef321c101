//! A fake IDE window for integration tests.
//!
//! Serves `/json/list` over HTTP and answers `Runtime.evaluate` on a websocket
//! the way an injected payload would. Behaviour is driven through
//! [`PageState`].

#![allow(dead_code)]

use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Marker every test payload script contains.
pub const BOOTSTRAP_MARKER: &str = "/*autopilot-test-payload*/";

pub fn test_payload() -> autopilot_core::Payload {
    autopilot_core::Payload::new(format!(
        "{BOOTSTRAP_MARKER} globalThis.__autopilot = globalThis.__autopilot || {{}};"
    ))
}

/// Observable and controllable state of the fake page.
#[derive(Debug, Default)]
pub struct PageState {
    pub injected: bool,
    pub bootstrap_count: usize,
    pub fail_bootstrap: bool,
    /// Swallow every request without answering.
    pub silent: bool,
    /// Hold each reply this long before sending it.
    pub reply_delay: Option<Duration>,
    pub clicks: u64,
    pub blocked: u64,
    pub notification: Option<Value>,
    pub resets: usize,
    pub stopped: bool,
    pub configs: Vec<Value>,
    pub evaluations: usize,
    pub connections: usize,
}

pub struct FakeTarget {
    pub page_id: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub state: Arc<Mutex<PageState>>,
    kill: watch::Sender<u64>,
    tasks: Vec<JoinHandle<()>>,
}

impl FakeTarget {
    pub async fn start(page_id: &str) -> Self {
        let state = Arc::new(Mutex::new(PageState::default()));
        let (kill, kill_rx) = watch::channel(0u64);

        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_port = ws_listener.local_addr().unwrap().port();
        let ws_task = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Ok((tcp, _)) = ws_listener.accept().await {
                    let state = state.clone();
                    let kill_rx = kill_rx.clone();
                    tokio::spawn(serve_socket(tcp, state, kill_rx));
                }
            })
        };

        let pages = json!([
            page_json(page_id, ws_port),
            {
                "id": format!("{page_id}-devtools"),
                "type": "page",
                "url": "devtools://devtools/bundled/inspector.html",
                "webSocketDebuggerUrl": format!("ws://127.0.0.1:{ws_port}/devtools/page/x")
            },
            {"id": format!("{page_id}-worker"), "type": "service_worker", "url": "app://sw"}
        ]);
        let (http_port, http_task) = serve_list(pages).await;

        Self {
            page_id: page_id.to_string(),
            http_port,
            ws_port,
            state,
            kill,
            tasks: vec![ws_task, http_task],
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut PageState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Simulate a page reload: the payload global disappears.
    pub fn reload(&self) {
        self.with_state(|s| s.injected = false);
    }

    /// Close every open control socket from the server side.
    pub fn drop_connections(&self) {
        self.kill.send_modify(|generation| *generation += 1);
    }

    pub fn page_descriptor(&self) -> autopilot_core::PageDescriptor {
        autopilot_core::PageDescriptor {
            id: self.page_id.clone(),
            kind: "page".to_string(),
            title: "workbench".to_string(),
            url: "vscode-file://vscode-app/workbench.html".to_string(),
            web_socket_debugger_url: Some(format!(
                "ws://127.0.0.1:{}/devtools/page/{}",
                self.ws_port, self.page_id
            )),
        }
    }
}

/// Serve one `/json/list` that lists the workbench page of every target, the
/// way one debugging port lists every window of an IDE.
pub async fn serve_combined_list(targets: &[&FakeTarget]) -> (u16, JoinHandle<()>) {
    let pages = targets
        .iter()
        .map(|t| page_json(&t.page_id, t.ws_port))
        .collect::<Vec<_>>();
    serve_list(Value::Array(pages)).await
}

fn page_json(page_id: &str, ws_port: u16) -> Value {
    json!({
        "id": page_id,
        "type": "page",
        "title": "workbench",
        "url": "vscode-file://vscode-app/workbench.html",
        "webSocketDebuggerUrl": format!("ws://127.0.0.1:{ws_port}/devtools/page/{page_id}")
    })
}

async fn serve_list(pages: Value) -> (u16, JoinHandle<()>) {
    let router = Router::new().route(
        "/json/list",
        get(move || {
            let pages = pages.clone();
            async move { Json(pages) }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (port, task)
}

impl Drop for FakeTarget {
    fn drop(&mut self) {
        self.drop_connections();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve_socket(
    tcp: tokio::net::TcpStream,
    state: Arc<Mutex<PageState>>,
    mut kill_rx: watch::Receiver<u64>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };
    state.lock().unwrap().connections += 1;
    let _ = kill_rx.borrow_and_update();

    loop {
        tokio::select! {
            changed = kill_rx.changed() => {
                if changed.is_ok() {
                    let _ = ws.close(None).await;
                }
                return;
            }
            message = ws.next() => {
                let Some(Ok(message)) = message else { return };
                let Message::Text(text) = message else { continue };
                let request: Value = serde_json::from_str(&text).unwrap();
                let reply = answer(&state, &request);
                let delay = state.lock().unwrap().reply_delay;
                if let (Some(delay), Some(_)) = (delay, &reply) {
                    tokio::time::sleep(delay).await;
                }
                if let Some(reply) = reply {
                    if ws.send(Message::Text(reply.to_string())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn value_reply(id: &Value, value: Value) -> Value {
    json!({"id": id, "result": {"result": {"type": "object", "value": value}}})
}

fn answer(state: &Mutex<PageState>, request: &Value) -> Option<Value> {
    let id = &request["id"];
    let mut state = state.lock().unwrap();
    if state.silent {
        return None;
    }
    if request["method"] != "Runtime.evaluate" {
        return Some(json!({"id": id, "error": {"code": -32601, "message": "method not found"}}));
    }
    state.evaluations += 1;

    let expr = request["params"]["expression"].as_str().unwrap_or_default();

    if expr.contains(BOOTSTRAP_MARKER) {
        state.bootstrap_count += 1;
        if state.fail_bootstrap {
            return Some(json!({
                "id": id,
                "result": {
                    "result": {"type": "object"},
                    "exceptionDetails": {
                        "text": "Uncaught",
                        "exception": {"description": "Error: bootstrap exploded"}
                    }
                }
            }));
        }
        state.injected = true;
        return Some(value_reply(id, json!(true)));
    }

    // Anything that is not a payload call echoes its own source.
    if !expr.contains("globalThis.__autopilot") {
        return Some(value_reply(id, json!(expr)));
    }

    let missing_is_null = expr.contains(".getStats(") || expr.contains(".takeNotification(");
    if !state.injected {
        let value = if missing_is_null {
            Value::Null
        } else {
            json!("not-injected")
        };
        return Some(value_reply(id, value));
    }

    let value = if let Some((_, rest)) = expr.split_once("api.start(") {
        let config = rest
            .rsplit_once("); })()")
            .and_then(|(json, _)| serde_json::from_str::<Value>(json).ok())
            .unwrap_or(Value::Null);
        state.configs.push(config);
        state.stopped = false;
        json!("started")
    } else if expr.contains("api.stop()") {
        state.stopped = true;
        json!("stopped")
    } else if expr.contains("api.getStats(") {
        let stats = json!({"clicks": state.clicks, "blockedCommands": state.blocked});
        state.clicks = 0;
        state.blocked = 0;
        stats
    } else if expr.contains("api.takeNotification()") {
        state.notification.take().unwrap_or(Value::Null)
    } else if expr.contains("api.resetCircuit()") {
        state.resets += 1;
        json!("reset")
    } else {
        Value::Null
    };

    Some(value_reply(id, value))
}
