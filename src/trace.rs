// ABOUTME: Structured trace events emitted by the pipeline and VM

use std::rc::Rc;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lex,
    Parse,
    Import,
    Resolve,
    Lower,
    Optimize,
    Execute,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Lex => "Tokenizing",
            Phase::Parse => "Parsing",
            Phase::Import => "Resolving imports",
            Phase::Resolve => "Semantic analysis",
            Phase::Lower => "Generating IR",
            Phase::Optimize => "Optimizing",
            Phase::Execute => "Running",
        }
    }
}

/// An event the host can subscribe to. The core never prints; the driver
/// decides what (if anything) to show.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    PhaseStarted { phase: Phase },
    PhaseFinished { phase: Phase, detail: String },
    GcCycle { freed: usize, live: usize },
}

pub type TraceSink = Rc<dyn Fn(&TraceEvent)>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_sink_receives_events() {
        let seen: Rc<RefCell<Vec<TraceEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: TraceSink = Rc::new(move |event| seen_clone.borrow_mut().push(event.clone()));

        sink(&TraceEvent::PhaseStarted { phase: Phase::Lex });
        sink(&TraceEvent::GcCycle { freed: 3, live: 7 });

        let events = seen.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], TraceEvent::PhaseStarted { phase: Phase::Lex });
    }
}
