//! Aggregate and persistence doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{AggregateRoot, DomainEvent, Handlers, PendingEvents, RecordOf};
use event_store::Version;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{RepositoryError, Result};
use crate::persistence::Persistence;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum NoteEvent {
    Written { text: String },
    Erased,
}

impl DomainEvent for NoteEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Written { .. } => "Written",
            Self::Erased => "Erased",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub key: String,
    pub version: Version,
    pub lines: Vec<String>,
    #[serde(skip)]
    pub changes: PendingEvents<String, NoteEvent>,
}

impl AggregateRoot for Note {
    type Key = String;
    type Event = NoteEvent;
    type Snapshot = Self;

    fn aggregate_type() -> &'static str {
        "test.note"
    }

    fn uninitialized(key: String) -> Self {
        Self {
            key,
            version: Version::initial(),
            lines: Vec::new(),
            changes: PendingEvents::default(),
        }
    }

    fn key(&self) -> &String {
        &self.key
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending(&self) -> &PendingEvents<String, NoteEvent> {
        &self.changes
    }

    fn pending_mut(&mut self) -> &mut PendingEvents<String, NoteEvent> {
        &mut self.changes
    }

    fn register_handlers(handlers: &mut Handlers<Self>) {
        handlers
            .on("Written", |note, event| {
                if let NoteEvent::Written { text } = event {
                    note.lines.push(text.clone());
                }
            })
            .on("Erased", |note, _| note.lines.clear());
    }
}

impl Note {
    pub fn written(key: &str, text: &str) -> Self {
        let mut note = Self::uninitialized(key.to_string());
        note.write(text);
        note
    }

    pub fn write(&mut self, text: &str) {
        self.raise(NoteEvent::Written {
            text: text.to_string(),
        })
        .unwrap();
    }
}

#[derive(Default)]
struct State {
    stored: HashMap<String, Note>,
    calls: Vec<String>,
    fail_next_update: bool,
    block_reads: bool,
}

/// Keeps committed notes in a map and records every storage call.
#[derive(Clone, Default)]
pub struct RecordingPersistence {
    state: Arc<Mutex<State>>,
}

impl RecordingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn stored(&self, key: &str) -> Option<Note> {
        self.state.lock().await.stored.get(key).cloned()
    }

    pub async fn seed(&self, note: Note) {
        self.state
            .lock()
            .await
            .stored
            .insert(note.key.clone(), note);
    }

    pub async fn fail_next_update(&self) {
        self.state.lock().await.fail_next_update = true;
    }

    /// Makes every later read hang until it is cancelled.
    pub async fn block_reads(&self) {
        self.state.lock().await.block_reads = true;
    }
}

#[async_trait]
impl Persistence<Note> for RecordingPersistence {
    async fn select_by_key(&self, key: &String) -> Result<Option<Note>> {
        let found = {
            let mut state = self.state.lock().await;
            state.calls.push(format!("select {key}"));
            if state.block_reads {
                None
            } else {
                Some(state.stored.get(key).cloned())
            }
        };
        match found {
            Some(note) => Ok(note),
            None => std::future::pending().await,
        }
    }

    async fn insert(&self, note: &mut Note) -> Result<Vec<RecordOf<Note>>> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("insert {}", note.key));
        if state.stored.contains_key(&note.key) {
            return Err(RepositoryError::duplicate(Note::aggregate_type(), &note.key));
        }
        let events = note.commit();
        state.stored.insert(note.key.clone(), note.clone());
        Ok(events)
    }

    async fn update(
        &self,
        note: &mut Note,
        original_version: Version,
    ) -> Result<Vec<RecordOf<Note>>> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("update {}", note.key));
        let actual = state.stored.get(&note.key).map(|n| n.version);
        if std::mem::take(&mut state.fail_next_update) || actual != Some(original_version) {
            return Err(RepositoryError::ConcurrencyConflict {
                aggregate_type: Note::aggregate_type(),
                key: note.key.clone(),
                expected: original_version,
                actual,
            });
        }
        let events = note.commit();
        state.stored.insert(note.key.clone(), note.clone());
        Ok(events)
    }

    async fn delete(&self, key: &String) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete {key}"));
        state.stored.remove(key);
        Ok(())
    }
}
