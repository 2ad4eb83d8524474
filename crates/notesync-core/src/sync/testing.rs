//! In-memory test doubles for the sync engine

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::network::{Connectivity, NetworkType};
use super::remote::{RemoteApi, RemoteError, RemoteNote};
use crate::models::{now_millis, EntryContent};

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    notes: BTreeMap<String, RemoteNote>,
    next_id: u64,
    failures: VecDeque<RemoteError>,
    fail_list: bool,
    delay: Option<Duration>,
    mutations: usize,
    hook: Option<Hook>,
}

/// Remote API backed by a map
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a note as if another device created it
    pub fn insert(&self, title: &str, description: &str, color: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("r{}", state.next_id);
        let now = now_millis().timestamp_millis();
        state.notes.insert(
            id.clone(),
            RemoteNote {
                id: id.clone(),
                title: title.to_string(),
                description: description.to_string(),
                color: color.to_string(),
                created: now,
                edited: now,
            },
        );
        id
    }

    /// Change a note as if another device edited it
    pub fn edit(&self, id: &str, f: impl FnOnce(&mut RemoteNote)) {
        let mut state = self.state.lock().unwrap();
        let note = state.notes.get_mut(id).unwrap();
        f(note);
        note.edited = now_millis().timestamp_millis();
    }

    /// Delete a note as if another device removed it
    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().notes.remove(id);
    }

    pub fn note(&self, id: &str) -> Option<RemoteNote> {
        self.state.lock().unwrap().notes.get(id).cloned()
    }

    pub fn notes(&self) -> Vec<RemoteNote> {
        self.state.lock().unwrap().notes.values().cloned().collect()
    }

    /// Fail the next call with `error`; queued errors are used in order
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    /// Make every list call fail with a server error
    pub fn fail_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    /// Delay every call
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Run `hook` right after the next create, update or delete
    pub fn on_next_mutation(&self, hook: impl FnOnce() + Send + 'static) {
        self.state.lock().unwrap().hook = Some(Box::new(hook));
    }

    /// Number of successful creates, updates and deletes
    pub fn mutation_count(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    async fn begin(&self) -> Result<(), RemoteError> {
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state.lock().unwrap().failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn mutated(&self) {
        let hook = {
            let mut state = self.state.lock().unwrap();
            state.mutations += 1;
            state.hook.take()
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

fn write_content(note: &mut RemoteNote, content: &EntryContent) {
    note.title = content.title.clone();
    note.description = content.description.clone();
    note.color = content.color.clone();
    note.edited = content.edited_at.timestamp_millis();
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn list_notes(&self) -> Result<Vec<RemoteNote>, RemoteError> {
        self.begin().await?;
        if self.state.lock().unwrap().fail_list {
            return Err(RemoteError::Http {
                status: 500,
                message: "list unavailable".to_string(),
            });
        }
        Ok(self.notes())
    }

    async fn get_note(&self, id: &str) -> Result<Option<RemoteNote>, RemoteError> {
        self.begin().await?;
        Ok(self.note(id))
    }

    async fn create_note(
        &self,
        content: &EntryContent,
        created_at: DateTime<Utc>,
    ) -> Result<String, RemoteError> {
        self.begin().await?;
        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("r{}", state.next_id);
            let mut note = RemoteNote {
                id: id.clone(),
                title: String::new(),
                description: String::new(),
                color: String::new(),
                created: created_at.timestamp_millis(),
                edited: 0,
            };
            write_content(&mut note, content);
            state.notes.insert(id.clone(), note);
            id
        };
        self.mutated();
        Ok(id)
    }

    async fn update_note(&self, id: &str, content: &EntryContent) -> Result<(), RemoteError> {
        self.begin().await?;
        {
            let mut state = self.state.lock().unwrap();
            let Some(note) = state.notes.get_mut(id) else {
                return Err(RemoteError::Http {
                    status: 404,
                    message: format!("no note {}", id),
                });
            };
            write_content(note, content);
        }
        self.mutated();
        Ok(())
    }

    async fn delete_note(&self, id: &str) -> Result<(), RemoteError> {
        self.begin().await?;
        self.state.lock().unwrap().notes.remove(id);
        self.mutated();
        Ok(())
    }
}

/// Connectivity that reports whatever it was set to
pub struct StaticConnectivity {
    network: Mutex<NetworkType>,
}

impl StaticConnectivity {
    pub fn new(network: NetworkType) -> Self {
        Self {
            network: Mutex::new(network),
        }
    }

    pub fn set(&self, network: NetworkType) {
        *self.network.lock().unwrap() = network;
    }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn check(&self) -> NetworkType {
        *self.network.lock().unwrap()
    }
}
