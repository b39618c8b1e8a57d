use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use campus_notify::{
    handlers::{HandlerKind, build_registry},
    models::{
        message::{BrokerMessage, ChannelEvent},
        notification::{PushEnvelope, UserType},
    },
    pipeline::{
        broadcast::LocalBroadcaster,
        dispatcher::{DispatchOutcome, EventDispatcher, MessageSource},
        push::{Broadcaster, PushChannel, PushSender},
        registry::{EventHandler, HandlerRegistry},
    },
};
use serde_json::{Map, Value};
use tokio::sync::Notify;

pub const DEFAULT_BINDINGS: &[(&str, HandlerKind)] = &[
    ("task.assigned", HandlerKind::TaskAssigned),
    ("task.updated", HandlerKind::TaskUpdated),
    ("task.submitted", HandlerKind::TaskSubmitted),
    ("task.deadline_reminder", HandlerKind::TaskDeadline),
    ("student.registered", HandlerKind::StudentRegistered),
    ("notification.*", HandlerKind::Generic),
];

pub struct Pipeline {
    pub hub: Arc<LocalBroadcaster>,
    pub dispatcher: EventDispatcher,
}

/// Default bindings wired to an in-process hub.
pub fn pipeline() -> Pipeline {
    let hub = Arc::new(LocalBroadcaster::default());
    let push_channel = Arc::new(PushChannel::new(hub.clone(), Duration::from_secs(1)));
    let registry = build_registry(DEFAULT_BINDINGS.iter().copied(), &push_channel)
        .expect("default bindings are valid");

    Pipeline {
        hub,
        dispatcher: EventDispatcher::new(Arc::new(registry), Duration::from_secs(2)),
    }
}

pub fn event(channel: &str, payload: Value) -> ChannelEvent {
    match payload {
        Value::Object(map) => ChannelEvent::new(channel, map),
        other => panic!("test payload must be an object, got {}", other),
    }
}

/// Message source replaying a fixed list, recording settlements.
#[derive(Default)]
pub struct VecSource {
    messages: VecDeque<BrokerMessage>,
    pub subscribed: Vec<String>,
    pub settled: Vec<(String, DispatchOutcome)>,
    /// Park forever instead of closing once the list is empty.
    pub hold_open: bool,
}

impl VecSource {
    pub fn new(messages: Vec<(&str, &str)>) -> Self {
        Self {
            messages: messages
                .into_iter()
                .enumerate()
                .map(|(tag, (channel, payload))| {
                    BrokerMessage::new(channel, payload.as_bytes()).with_delivery_tag(tag as u64)
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl MessageSource for VecSource {
    async fn subscribe(&mut self, patterns: &[String]) -> Result<(), Error> {
        self.subscribed = patterns.to_vec();
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, Error> {
        match self.messages.pop_front() {
            Some(message) => Ok(Some(message)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn settle(&mut self, message: &BrokerMessage, outcome: &DispatchOutcome) -> Result<(), Error> {
        self.settled.push((message.channel.clone(), outcome.clone()));
        Ok(())
    }
}

/// Handler recording every channel it sees.
pub struct RecordingHandler {
    name: String,
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &ChannelEvent) -> Result<(), Error> {
        self.seen.lock().unwrap().push(event.channel.clone());
        Ok(())
    }
}

pub struct FailingHandler;

#[async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _event: &ChannelEvent) -> Result<(), Error> {
        Err(anyhow!("database unavailable"))
    }
}

pub struct PanickingHandler;

#[async_trait]
impl EventHandler for PanickingHandler {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _event: &ChannelEvent) -> Result<(), Error> {
        panic!("unexpected payload shape");
    }
}

/// Signals once it starts, then takes `delay` before finishing.
pub struct SlowHandler {
    pub started: Arc<Notify>,
    pub finished: Arc<Mutex<bool>>,
    pub delay: Duration,
}

#[async_trait]
impl EventHandler for SlowHandler {
    fn name(&self) -> &str {
        "slow"
    }

    async fn handle(&self, _event: &ChannelEvent) -> Result<(), Error> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        *self.finished.lock().unwrap() = true;
        Ok(())
    }
}

pub fn registry_with(bindings: Vec<(&str, Arc<dyn EventHandler>)>) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    for (matcher, handler) in bindings {
        registry.register(matcher, handler).expect("valid matcher");
    }
    Arc::new(registry)
}

pub struct FailingBroadcaster;

#[async_trait]
impl Broadcaster for FailingBroadcaster {
    async fn broadcast(
        &self,
        _channel: &str,
        _event: &str,
        _envelope: &PushEnvelope,
        _except_socket: Option<&str>,
    ) -> Result<(), Error> {
        Err(anyhow!("redis connection refused"))
    }
}

pub struct StalledBroadcaster;

#[async_trait]
impl Broadcaster for StalledBroadcaster {
    async fn broadcast(
        &self,
        _channel: &str,
        _event: &str,
        _envelope: &PushEnvelope,
        _except_socket: Option<&str>,
    ) -> Result<(), Error> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentPush {
    pub user_id: i64,
    pub user_type: UserType,
    pub content: String,
    pub data: Map<String, Value>,
}

#[derive(Default)]
pub struct RecordingPushSender {
    pub sent: Mutex<Vec<SentPush>>,
}

impl RecordingPushSender {
    pub fn sent(&self) -> Vec<SentPush> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn send_push(
        &self,
        user_id: i64,
        user_type: UserType,
        content: &str,
        data: &Map<String, Value>,
    ) -> Result<(), Error> {
        self.sent.lock().unwrap().push(SentPush {
            user_id,
            user_type,
            content: content.to_string(),
            data: data.clone(),
        });
        Ok(())
    }
}

pub struct FailingPushSender;

#[async_trait]
impl PushSender for FailingPushSender {
    async fn send_push(
        &self,
        _user_id: i64,
        _user_type: UserType,
        _content: &str,
        _data: &Map<String, Value>,
    ) -> Result<(), Error> {
        Err(anyhow!("fcm quota exceeded"))
    }
}

pub struct StalledPushSender;

#[async_trait]
impl PushSender for StalledPushSender {
    async fn send_push(
        &self,
        _user_id: i64,
        _user_type: UserType,
        _content: &str,
        _data: &Map<String, Value>,
    ) -> Result<(), Error> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}
