//! Observer protocol for the optimiser life-cycle.
//!
//! A [`Listener`] is a partial map from [`EventKind`] to handler. Events it
//! has no handler for are skipped. Every handler runs on the engine thread,
//! in registration order, and receives a read-only view of the run record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;
use wp_types::{AcquisitionFamily, Extremum, RunRecord, SelectionInfo};

/// The fixed set of life-cycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Registered,
    RunStarted,
    SelectionStarted,
    SurrogateFitted,
    AcquisitionMaximised,
    SelectionFinished,
    EvaluationStarted,
    EvaluationFinished,
    RunFinished,
    Unregistered,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        Self::Registered,
        Self::RunStarted,
        Self::SelectionStarted,
        Self::SurrogateFitted,
        Self::AcquisitionMaximised,
        Self::SelectionFinished,
        Self::EvaluationStarted,
        Self::EvaluationFinished,
        Self::RunFinished,
        Self::Unregistered,
    ];
}

/// Summary of an optimiser handed to listeners on registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimiserInfo {
    pub run_id: Uuid,
    pub name: String,
    pub extremum: Extremum,
    pub param_names: Vec<String>,
    pub acquisition: String,
    pub family: AcquisitionFamily,
    pub surrogate: String,
    pub asynchronous: bool,
    pub max_trials: usize,
    pub finished_trials: usize,
}

/// A life-cycle event with its payload.
#[derive(Debug, Clone, Copy)]
pub enum OptimiserEvent<'a> {
    Registered {
        info: &'a OptimiserInfo,
    },
    RunStarted {
        finished_trials: usize,
        max_trials: usize,
    },
    /// `trial_num` is the number about to be assigned.
    SelectionStarted {
        trial_num: usize,
    },
    SurrogateFitted {
        trial_num: usize,
        training_points: usize,
    },
    AcquisitionMaximised {
        trial_num: usize,
        max_acq: f64,
    },
    SelectionFinished {
        trial_num: usize,
        x: &'a [f64],
        selection_info: &'a SelectionInfo,
    },
    EvaluationStarted {
        trial_num: usize,
    },
    /// `y` is absent when the evaluation failed.
    EvaluationFinished {
        trial_num: usize,
        y: Option<f64>,
        eval_info: Option<&'a serde_json::Value>,
    },
    RunFinished {
        finished_trials: usize,
    },
    Unregistered,
}

impl OptimiserEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Registered { .. } => EventKind::Registered,
            Self::RunStarted { .. } => EventKind::RunStarted,
            Self::SelectionStarted { .. } => EventKind::SelectionStarted,
            Self::SurrogateFitted { .. } => EventKind::SurrogateFitted,
            Self::AcquisitionMaximised { .. } => EventKind::AcquisitionMaximised,
            Self::SelectionFinished { .. } => EventKind::SelectionFinished,
            Self::EvaluationStarted { .. } => EventKind::EvaluationStarted,
            Self::EvaluationFinished { .. } => EventKind::EvaluationFinished,
            Self::RunFinished { .. } => EventKind::RunFinished,
            Self::Unregistered => EventKind::Unregistered,
        }
    }

    pub fn trial_num(&self) -> Option<usize> {
        match self {
            Self::SelectionStarted { trial_num }
            | Self::SurrogateFitted { trial_num, .. }
            | Self::AcquisitionMaximised { trial_num, .. }
            | Self::SelectionFinished { trial_num, .. }
            | Self::EvaluationStarted { trial_num }
            | Self::EvaluationFinished { trial_num, .. } => Some(*trial_num),
            _ => None,
        }
    }
}

type Handler = Box<dyn FnMut(&OptimiserEvent<'_>, &RunRecord) + Send>;

/// A named set of event handlers.
pub struct Listener {
    name: String,
    handlers: HashMap<EventKind, Handler>,
    catch_all: Option<Handler>,
}

impl Listener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
            catch_all: None,
        }
    }

    /// Handle one kind of event. A second handler for the same kind
    /// replaces the first.
    pub fn on(
        mut self,
        kind: EventKind,
        handler: impl FnMut(&OptimiserEvent<'_>, &RunRecord) + Send + 'static,
    ) -> Self {
        self.handlers.insert(kind, Box::new(handler));
        self
    }

    /// Handle every event, after any kind-specific handler.
    pub fn on_every(
        mut self,
        handler: impl FnMut(&OptimiserEvent<'_>, &RunRecord) + Send + 'static,
    ) -> Self {
        self.catch_all = Some(Box::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.catch_all.is_some() || self.handlers.contains_key(&kind)
    }

    fn deliver(&mut self, event: &OptimiserEvent<'_>, record: &RunRecord) {
        if let Some(handler) = self.handlers.get_mut(&event.kind()) {
            handler(event, record);
        }
        if let Some(handler) = self.catch_all.as_mut() {
            handler(event, record);
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&EventKind> = self.handlers.keys().collect();
        kinds.sort_by_key(|k| EventKind::ALL.iter().position(|a| a == *k));
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("handlers", &kinds)
            .field("catch_all", &self.catch_all.is_some())
            .finish()
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listeners in registration order.
#[derive(Debug, Default)]
pub struct ListenerSet {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener and deliver `registered` to it alone.
    pub fn register(
        &mut self,
        mut listener: Listener,
        info: &OptimiserInfo,
        record: &RunRecord,
    ) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        listener.deliver(&OptimiserEvent::Registered { info }, record);
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener after delivering `unregistered` to it. No further
    /// events reach it.
    pub fn unregister(&mut self, id: ListenerId, record: &RunRecord) -> Option<Listener> {
        let index = self.listeners.iter().position(|(lid, _)| *lid == id)?;
        let (_, mut listener) = self.listeners.remove(index);
        listener.deliver(&OptimiserEvent::Unregistered, record);
        Some(listener)
    }

    pub fn notify(&mut self, event: &OptimiserEvent<'_>, record: &RunRecord) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.deliver(event, record);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
