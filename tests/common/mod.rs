//! Shared fixtures for the integration tests

#![allow(dead_code)]

use character_session_engine::planner::{Decision, PlanRequest, Planner};
use character_session_engine::{
    CharacterId, Connection, EngineOptions, Envelope, MemoryChannel, MemoryPeer, Result,
    SessionManager, serve_connection,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long a test waits for an expected envelope
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Options with fast polling and a heartbeat timeout that never fires by itself
pub fn fast_options() -> EngineOptions {
    EngineOptions::builder()
        .heartbeat_timeout(Duration::from_secs(3600))
        .grace_period(Duration::from_secs(3600))
        .reply_poll_interval(Duration::from_millis(10))
        .starter_poll_interval(Duration::from_millis(10))
        .reconcile_interval(Duration::from_millis(50))
        .store_timeout(Duration::from_secs(2))
        .build()
}

/// Canned decision for every request kind
pub fn canned(request: &PlanRequest) -> Decision {
    match request {
        PlanRequest::DailyObjectives { .. } => Decision::Objectives {
            objectives: vec!["earn money".into(), "eat".into()],
        },
        PlanRequest::MetaSequence { .. } => Decision::ActionSequence {
            commands: vec!["go work".into(), "eat bread".into()],
        },
        PlanRequest::Replan { .. } => Decision::ActionSequence {
            commands: vec!["retry".into()],
        },
        PlanRequest::JobApplication { openings, .. } => Decision::JobApplication {
            job: openings.first().cloned().unwrap_or(Value::Null),
            cv: "hard worker".into(),
        },
        PlanRequest::MayorDecision { submissions, .. } => Decision::MayorDecision {
            decisions: submissions
                .iter()
                .map(|s| json!({ "submission": s, "accepted": true }))
                .collect(),
        },
        PlanRequest::Reflect { .. } => Decision::Reflection {
            text: "today went fine".into(),
        },
        PlanRequest::Reply { .. } => Decision::Utterance {
            content: "nice to hear".into(),
        },
        PlanRequest::Impression { .. } => Decision::Impression {
            summary: json!({ "tone": "friendly" }),
        },
        PlanRequest::Intimacy { .. } => Decision::Intimacy { level: 2 },
        PlanRequest::DailyTopics { .. } => Decision::Topics {
            topics: vec!["weather".into(), "market".into(), "festival".into()],
        },
        PlanRequest::ConversationNecessity { .. } => Decision::Necessity { needed: true },
        PlanRequest::Opening { topic, .. } => Decision::Utterance {
            content: format!("let's talk about {topic}"),
        },
    }
}

type Respond = dyn Fn(&PlanRequest) -> Result<Decision> + Send + Sync;

/// Planner that answers synchronously and records every request
pub struct ScriptedPlanner {
    respond: Box<Respond>,
    requests: Mutex<Vec<PlanRequest>>,
}

impl ScriptedPlanner {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&PlanRequest) -> Result<Decision> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Planner answering every request with [`canned`]
    pub fn canned() -> Arc<Self> {
        Self::new(|request| Ok(canned(request)))
    }

    pub fn requests(&self) -> Vec<PlanRequest> {
        self.requests.lock().clone()
    }

    /// Number of calls for a request kind (see `PlanRequest::name`)
    pub fn count(&self, name: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.name() == name)
            .count()
    }
}

impl Planner for ScriptedPlanner {
    fn plan<'a>(&'a self, request: &'a PlanRequest) -> BoxFuture<'a, Result<Decision>> {
        self.requests.lock().push(request.clone());
        let result = (self.respond)(request);
        Box::pin(async move { result })
    }
}

/// Inbound envelope from a character
pub fn envelope(id: i64, name: &str, data: Value) -> Envelope {
    Envelope {
        character_id: Some(CharacterId::new(id)),
        message_code: 0,
        message_name: name.to_string(),
        data,
    }
}

/// Wait for the next engine envelope with the given name, skipping others
pub async fn recv_named(peer: &mut MemoryPeer, name: &str) -> Envelope {
    let wait = async {
        loop {
            match peer.recv().await {
                Some(env) if env.message_name == name => return env,
                Some(_) => {}
                None => panic!("channel ended while waiting for '{name}'"),
            }
        }
    };
    tokio::time::timeout(RECV_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for '{name}'"))
}

/// Poll `cond` until it holds or the receive timeout elapses
pub async fn eventually<F>(what: &str, cond: F)
where
    F: Fn() -> bool,
{
    let wait = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(RECV_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Serve a fresh in-memory connection and complete the handshake
///
/// Returns the peer, the handshake acknowledgement and the serving task.
pub async fn connect(
    manager: &SessionManager,
    id: i64,
) -> (MemoryPeer, Envelope, JoinHandle<()>) {
    let (connection, mut peer): (Connection, MemoryPeer) = MemoryChannel::pair();
    let task = tokio::spawn(serve_connection(manager.clone(), connection));
    assert!(peer.send(envelope(id, "connectionInit", json!({}))));
    let ack = tokio::time::timeout(RECV_TIMEOUT, peer.recv())
        .await
        .expect("handshake timed out")
        .expect("channel ended before the handshake ack");
    (peer, ack, task)
}

/// `(result, msg)` of a handshake acknowledgement
pub fn ack_parts(ack: &Envelope) -> (bool, String) {
    (
        ack.data["result"].as_bool().unwrap_or(false),
        ack.data["msg"].as_str().unwrap_or_default().to_string(),
    )
}
