//! State tables defined in configuration

use drover_config::MachineSpec;
use drover_core::{EventArgs, EventOutcome, MachineResult, StateTable, Transition};
use std::time::Duration;

/// A [`StateTable`] whose states, timeouts and event targets come from a
/// [`MachineSpec`]. Targets were checked when the config was validated.
#[derive(Debug, Clone)]
pub struct TableMachine {
    spec: MachineSpec,
}

impl TableMachine {
    pub fn new(spec: MachineSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &MachineSpec {
        &self.spec
    }
}

impl StateTable for TableMachine {
    fn timeout_for(&self, state: &str) -> Option<Duration> {
        self.spec.state(state).and_then(|s| s.timeout)
    }

    fn on_event(
        &self,
        t: &mut Transition<'_, Self>,
        event: &str,
        _args: &EventArgs,
    ) -> MachineResult<EventOutcome> {
        let target = self
            .spec
            .state(t.state())
            .and_then(|s| s.events.get(event))
            .cloned();

        match target {
            Some(target) => {
                t.goto(&target)?;
                Ok(EventOutcome::Handled)
            }
            None => Ok(EventOutcome::Ignored),
        }
    }

    fn on_timeout(&self, t: &mut Transition<'_, Self>) -> MachineResult<()> {
        let target = self
            .spec
            .state(t.state())
            .and_then(|s| s.on_timeout.clone());

        match target {
            Some(target) => t.goto(&target),
            None => t.drop_unhandled_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_config::parse_config;
    use drover_core::{EntityLog, MachineContext, MachineFactory, StateMachine, TableFactory};
    use drover_store::{SqliteStore, Store};
    use std::sync::Arc;

    const CONFIG: &str = r#"
config_version = 1

[[machines]]
entity_type = "device"

[[machines.states]]
name = "ready"
events = { reboot = "rebooting" }

[[machines.states]]
name = "rebooting"
timeout_secs = 90
on_timeout = "failed"
events = { booted = "ready" }

[[machines.states]]
name = "failed"
"#;

    fn factory() -> TableFactory<TableMachine> {
        let config = parse_config(CONFIG).unwrap();
        let spec = config.machines[0].clone();
        TableFactory::new(spec.entity_type.clone(), TableMachine::new(spec))
    }

    fn machine(store: &Arc<SqliteStore>, factory: &TableFactory<TableMachine>, name: &str) -> impl StateMachine {
        factory.build(MachineContext {
            entity_type: "device".into(),
            entity_name: name.into(),
            store: store.clone(),
            log: EntityLog::detached("device".into(), name.into()),
        })
    }

    #[test]
    fn timeouts_come_from_spec() {
        let factory = factory();
        let table = factory.table();
        assert_eq!(table.timeout_for("rebooting"), Some(Duration::from_secs(90)));
        assert_eq!(table.timeout_for("ready"), None);
        assert_eq!(table.timeout_for("nonexistent"), None);
    }

    #[test]
    fn events_follow_table() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store
            .add_entity(&"device".into(), &"dev-1".into(), "ready", None)
            .unwrap();
        let factory = factory();
        let dev = machine(&store, &factory, "dev-1");
        let args = serde_json::json!({});

        dev.handle_event("reboot", &args).unwrap();
        let record = store.get_entity(&"device".into(), &"dev-1".into()).unwrap();
        assert_eq!(record.state, "rebooting");
        assert!(record.state_timeout.is_some());

        // Not valid in rebooting; ignored
        dev.handle_event("reboot", &args).unwrap();
        assert_eq!(store.get_state(&"device".into(), &"dev-1".into()).unwrap(), "rebooting");

        dev.handle_event("booted", &args).unwrap();
        assert_eq!(store.get_state(&"device".into(), &"dev-1".into()).unwrap(), "ready");
    }

    #[test]
    fn timeout_target_or_clear() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let past = drover_util::now_utc() - chrono::Duration::seconds(1);
        store
            .add_entity(&"device".into(), &"dev-1".into(), "rebooting", Some(past))
            .unwrap();
        store
            .add_entity(&"device".into(), &"dev-2".into(), "ready", Some(past))
            .unwrap();
        let factory = factory();

        machine(&store, &factory, "dev-1").handle_timeout().unwrap();
        machine(&store, &factory, "dev-2").handle_timeout().unwrap();

        let dev1 = store.get_entity(&"device".into(), &"dev-1".into()).unwrap();
        assert_eq!(dev1.state, "failed");
        assert!(dev1.state_timeout.is_none());

        let dev2 = store.get_entity(&"device".into(), &"dev-2".into()).unwrap();
        assert_eq!(dev2.state, "ready");
        assert!(dev2.state_timeout.is_none());
    }
}
