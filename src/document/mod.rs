/*!
Macro documents: the saved file and the live, shared event list.

[`MacroDocument`] is the editor's save format:

```json
{
    "events": ["0.512 - Key pressed: 'a'", "Checkpoint: start"],
    "variables": {"score": "12"},
    "checkpoints": {"start": 1},
    "notifications": {"done": {"message": "Finished", "priority": 0}}
}
```

[`SharedMacro`] holds the event list and checkpoint table a run executes,
behind one lock so readers never see a list and table that disagree.
*/

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::NotificationMap;
use crate::engine::{MacroSource, VarValue};
use crate::events::{Event, parse_line};

/// Checkpoint name -> index of its `Checkpoint:` line.
pub type CheckpointTable = BTreeMap<String, usize>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroDocument {
    pub events: Vec<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, VarValue>,
    #[serde(default)]
    pub checkpoints: CheckpointTable,
    #[serde(default)]
    pub notifications: NotificationMap,
}

impl MacroDocument {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("Failed to parse macro document")
    }

    /// Pretty JSON with four-space indentation, as the editor writes it.
    pub fn to_json_string(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)
            .context("Failed to serialize macro document")?;
        String::from_utf8(out).context("Serialized macro document is not UTF-8")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read macro {}", path.display()))?;
        let doc = Self::from_json_str(&text).with_context(|| format!("Invalid macro {}", path.display()))?;
        debug!(target: "aimacro::document", events = doc.events.len(), "Loaded macro from {}", path.display());
        Ok(doc)
    }

    pub async fn load_async(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read macro {}", path.display()))?;
        let doc = Self::from_json_str(&text).with_context(|| format!("Invalid macro {}", path.display()))?;
        debug!(target: "aimacro::document", events = doc.events.len(), "Loaded macro from {}", path.display());
        Ok(doc)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json_string()?)
            .with_context(|| format!("Failed to write macro {}", path.display()))?;
        info!(target: "aimacro::document", "Macro saved to {}", path.display());
        Ok(())
    }

    pub async fn save_async(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tokio::fs::write(path, self.to_json_string()?)
            .await
            .with_context(|| format!("Failed to write macro {}", path.display()))?;
        info!(target: "aimacro::document", "Macro saved to {}", path.display());
        Ok(())
    }

    /// Recompute the checkpoint table from the `Checkpoint:` lines.
    pub fn rebuild_checkpoints(&mut self) {
        self.checkpoints = checkpoint_table(&self.events);
    }

    /// Stored checkpoints that disagree with the lines they point at.
    pub fn stale_checkpoints(&self) -> Vec<String> {
        let actual = checkpoint_table(&self.events);
        self.checkpoints
            .iter()
            .filter(|(name, index)| actual.get(name.as_str()) != Some(*index))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Checkpoint table for `events`. A name defined twice resolves to its last line.
pub fn checkpoint_table(events: &[String]) -> CheckpointTable {
    events
        .iter()
        .enumerate()
        .filter_map(|(index, line)| match parse_line(line) {
            Ok(parsed) => match parsed.event {
                Event::Checkpoint { name } => Some((name.trim().to_string(), index)),
                _ => None,
            },
            Err(_) => None,
        })
        .collect()
}

#[derive(Debug, Default)]
struct MacroState {
    events: Vec<String>,
    checkpoints: CheckpointTable,
}

/// Event list and checkpoint table shared between a run and an editor.
///
/// Structural edits (`insert`, `remove`, `move_event`) rebuild the table under
/// the same write lock.
#[derive(Debug, Default)]
pub struct SharedMacro {
    state: RwLock<MacroState>,
}

impl SharedMacro {
    /// Use `checkpoints` as given; see [`SharedMacro::with_rebuilt_checkpoints`].
    pub fn new(events: Vec<String>, checkpoints: CheckpointTable) -> Self {
        Self {
            state: RwLock::new(MacroState { events, checkpoints }),
        }
    }

    pub fn with_rebuilt_checkpoints(events: Vec<String>) -> Self {
        let checkpoints = checkpoint_table(&events);
        Self::new(events, checkpoints)
    }

    pub fn from_document(doc: &MacroDocument) -> Self {
        Self::new(doc.events.clone(), doc.checkpoints.clone())
    }

    pub fn events(&self) -> Vec<String> {
        self.read().events.clone()
    }

    pub fn checkpoints(&self) -> CheckpointTable {
        self.read().checkpoints.clone()
    }

    /// Copy the current list and table into `doc`.
    pub fn store_into(&self, doc: &mut MacroDocument) {
        let state = self.read();
        doc.events = state.events.clone();
        doc.checkpoints = state.checkpoints.clone();
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut state = self.write();
        state.events.push(line.into());
        state.checkpoints = checkpoint_table(&state.events);
    }

    /// Insert before `index` (clamped to the end).
    pub fn insert(&self, index: usize, line: impl Into<String>) {
        let mut state = self.write();
        let at = index.min(state.events.len());
        state.events.insert(at, line.into());
        state.checkpoints = checkpoint_table(&state.events);
    }

    pub fn remove(&self, index: usize) -> Option<String> {
        let mut state = self.write();
        if index >= state.events.len() {
            return None;
        }
        let removed = state.events.remove(index);
        state.checkpoints = checkpoint_table(&state.events);
        Some(removed)
    }

    /// Move the line at `from` so it ends up at `to`.
    pub fn move_event(&self, from: usize, to: usize) -> bool {
        let mut state = self.write();
        let len = state.events.len();
        if from >= len || to >= len {
            return false;
        }
        let line = state.events.remove(from);
        state.events.insert(to, line);
        state.checkpoints = checkpoint_table(&state.events);
        true
    }

    fn read(&self) -> RwLockReadGuard<'_, MacroState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MacroState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MacroSource for SharedMacro {
    fn event(&self, index: usize) -> Option<String> {
        self.read().events.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.read().events.len()
    }

    fn resolve_checkpoint(&self, name: &str) -> Option<usize> {
        self.read().checkpoints.get(name.trim()).copied()
    }

    fn rewrite_event_if(&self, index: usize, expected: &str, line: String) -> bool {
        match self.write().events.get_mut(index) {
            Some(slot) if slot.as_str() == expected => {
                *slot = line;
                true
            }
            _ => false,
        }
    }

    fn rewrite_event(&self, index: usize, line: String) -> bool {
        match self.write().events.get_mut(index) {
            Some(slot) => {
                *slot = line;
                true
            }
            None => false,
        }
    }
}
