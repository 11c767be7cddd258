use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::{Mutex, watch};

/// Implemented by domain state and event enums so the engine can key its
/// transition table on the variant, not the payload.
pub trait Keyed {
    type Kind: Copy + Eq + Hash + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Handler<S, E> = Box<dyn Fn(&S, &E) -> S + Send + Sync>;

/// Registers an initial state and per-(state, event) handlers, then builds
/// the machine. Pure configuration; nothing here runs at event time except
/// the handlers themselves.
pub struct StateMachineBuilder<S: Keyed, E: Keyed> {
    initial: S,
    table: HashMap<(S::Kind, E::Kind), Handler<S, E>>,
    default: Option<Handler<S, E>>,
}

impl<S, E> StateMachineBuilder<S, E>
where
    S: Keyed + Clone + PartialEq + Send + Sync + 'static,
    E: Keyed,
{
    pub fn new(initial: S) -> Self {
        Self { initial, table: HashMap::new(), default: None }
    }

    /// Register a handler for one (state kind, event kind) pair.
    /// Handlers must be total for their declared pair and must not block.
    pub fn on<F>(mut self, state: S::Kind, event: E::Kind, handler: F) -> Self
    where
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.table.insert((state, event), Box::new(handler));
        self
    }

    /// Handler applied when no specific entry matches.
    /// If never set, unmatched events leave the state unchanged.
    pub fn default_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.default = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> StateMachine<S, E> {
        let (tx, _) = watch::channel(self.initial);
        StateMachine {
            table: self.table,
            default: self.default,
            gate: Mutex::new(()),
            tx,
        }
    }
}

/// Generic serialized state/event dispatcher.
///
/// `send_event` applies events under mutual exclusion; concurrent senders
/// are linearized, never interleaved. The current state is readable at any
/// time and every change is published to a multi-reader watch stream.
pub struct StateMachine<S: Keyed, E: Keyed> {
    table: HashMap<(S::Kind, E::Kind), Handler<S, E>>,
    default: Option<Handler<S, E>>,
    gate: Mutex<()>,
    tx: watch::Sender<S>,
}

impl<S, E> StateMachine<S, E>
where
    S: Keyed + Clone + PartialEq + Send + Sync + 'static,
    E: Keyed,
{
    /// Apply one event and return the resulting state.
    ///
    /// An unregistered (state, event) combination is not an error: the
    /// default handler applies, which conventionally stays put.
    pub async fn send_event(&self, event: E) -> S {
        let _gate = self.gate.lock().await;
        let current = self.tx.borrow().clone();
        let next = match self.table.get(&(current.kind(), event.kind())) {
            Some(handler) => handler(&current, &event),
            None => match &self.default {
                Some(handler) => handler(&current, &event),
                None => current.clone(),
            },
        };
        self.tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next.clone();
                true
            }
        });
        next
    }

    /// Current state snapshot.
    pub fn state(&self) -> S {
        self.tx.borrow().clone()
    }

    /// Subscribe to state changes. Readers never block the writer.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq)]
    enum Light {
        Red,
        Green { cycles: u32 },
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    enum LightKind {
        Red,
        Green,
    }

    impl Keyed for Light {
        type Kind = LightKind;

        fn kind(&self) -> LightKind {
            match self {
                Light::Red => LightKind::Red,
                Light::Green { .. } => LightKind::Green,
            }
        }
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    enum Tick {
        Go,
        Stop,
    }

    impl Keyed for Tick {
        type Kind = Tick;

        fn kind(&self) -> Tick {
            *self
        }
    }

    fn machine() -> StateMachine<Light, Tick> {
        StateMachineBuilder::new(Light::Red)
            .on(LightKind::Red, Tick::Go, |state, _| match state {
                Light::Red => Light::Green { cycles: 1 },
                Light::Green { cycles } => Light::Green { cycles: cycles + 1 },
            })
            .on(LightKind::Green, Tick::Stop, |_, _| Light::Red)
            .build()
    }

    #[tokio::test]
    async fn registered_transitions_apply() {
        let fsm = machine();
        assert_eq!(fsm.send_event(Tick::Go).await, Light::Green { cycles: 1 });
        assert_eq!(fsm.send_event(Tick::Stop).await, Light::Red);
    }

    #[tokio::test]
    async fn unregistered_event_stays() {
        let fsm = machine();
        // Stop in Red has no handler and no default is configured.
        assert_eq!(fsm.send_event(Tick::Stop).await, Light::Red);
        assert_eq!(fsm.state(), Light::Red);
    }

    #[tokio::test]
    async fn default_handler_applies_when_no_entry_matches() {
        let fsm: StateMachine<Light, Tick> = StateMachineBuilder::new(Light::Red)
            .default_handler(|_, _| Light::Green { cycles: 99 })
            .build();
        assert_eq!(fsm.send_event(Tick::Go).await, Light::Green { cycles: 99 });
    }

    #[tokio::test]
    async fn watch_stream_sees_each_change() {
        let fsm = machine();
        let mut rx = fsm.subscribe();
        fsm.send_event(Tick::Go).await;
        assert_eq!(*rx.borrow_and_update(), Light::Green { cycles: 1 });
        fsm.send_event(Tick::Stop).await;
        assert_eq!(*rx.borrow_and_update(), Light::Red);
    }

    #[tokio::test]
    async fn stay_does_not_emit() {
        let fsm = machine();
        let mut rx = fsm.subscribe();
        rx.borrow_and_update();
        fsm.send_event(Tick::Stop).await; // unregistered, stays Red
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_events_are_serialized() {
        // Each Go increments the previous cycle count, so the final count
        // equals the number of events iff none were lost or interleaved.
        let fsm: StateMachine<Light, Tick> = StateMachineBuilder::new(Light::Green { cycles: 0 })
            .on(LightKind::Green, Tick::Go, |state, _| match state {
                Light::Green { cycles } => Light::Green { cycles: cycles + 1 },
                Light::Red => Light::Red,
            })
            .build();
        let fsm = Arc::new(fsm);
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let fsm = fsm.clone();
            tasks.push(tokio::spawn(async move {
                fsm.send_event(Tick::Go).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(fsm.state(), Light::Green { cycles: 64 });
    }
}
