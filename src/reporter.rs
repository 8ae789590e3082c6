use crate::events::Event;

/// Fire-and-forget progress sink; never consulted for control flow.
pub trait Progress {
    fn record(&mut self, event: Event);
}

/// Discards everything. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn record(&mut self, _event: Event) {}
}

/// Reporter that aggregates events and optionally mirrors them to stdout
/// as JSON lines.
pub struct Reporter {
    events: Vec<Event>,
    json_mode: bool,
}

impl Reporter {
    pub fn new(json_mode: bool) -> Self {
        Self {
            events: Vec::new(),
            json_mode,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl Progress for Reporter {
    fn record(&mut self, event: Event) {
        if self.json_mode
            && let Ok(line) = serde_json::to_string(&event)
        {
            println!("{}", line);
        }
        self.events.push(event);
    }
}

/// Progress-bar reporter over the six pipeline stages.
#[cfg(feature = "cli")]
pub struct BarReporter {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "cli")]
impl BarReporter {
    pub fn new() -> Self {
        let bar = indicatif::ProgressBar::new(6);
        bar.set_style(
            indicatif::ProgressStyle::with_template("{bar:24} {pos}/{len} {msg}")
                .expect("static template is valid"),
        );
        Self { bar }
    }
}

#[cfg(feature = "cli")]
impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl Progress for BarReporter {
    fn record(&mut self, event: Event) {
        match event {
            Event::StageStarted { stage, .. } => {
                self.bar.set_message(format!("{stage:?}"));
            }
            Event::StageCompleted { .. } | Event::StageSkipped { .. } => {
                self.bar.inc(1);
            }
            Event::GenerationCompleted { .. } => {
                self.bar.finish_with_message("done");
            }
            _ => {}
        }
    }
}
