//! Inline command execution (decide + evolve) without persistence.

/// Run a command against an aggregate and apply the resulting events in place.
///
/// Used by domain tests and by the infrastructure layer after it has
/// rehydrated an aggregate inside a unit of work.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: windledger_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
