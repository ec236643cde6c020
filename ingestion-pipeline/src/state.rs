use state_machines::state_machine;

state_machine! {
    name: IngestMachine,
    state: IngestState,
    initial: Ready,
    states: [Ready, Fetched, Parsed, Resolved, Persisted, Failed],
    events {
        fetch { transition: { from: Ready, to: Fetched } }
        parse { transition: { from: Fetched, to: Parsed } }
        resolve { transition: { from: Parsed, to: Resolved } }
        persist { transition: { from: Resolved, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Fetched, to: Failed }
            transition: { from: Parsed, to: Failed }
            transition: { from: Resolved, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestMachine<(), Ready> {
    IngestMachine::new(())
}
