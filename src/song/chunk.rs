use std::collections::BTreeMap;
use std::iter::Peekable;
use std::slice;

use crate::events::EngineEvent;
use crate::timing::Tick;

/// Groups a measure's events by identical tick. Created by
/// [`Measure::chunked`](super::Measure::chunked).
pub struct Chunks<'a> {
    start: Tick,
    adjustments: Option<&'a BTreeMap<u8, Vec<EngineEvent>>>,
    events: Peekable<slice::Iter<'a, EngineEvent>>,
}

impl<'a> Chunks<'a> {
    pub(super) fn new(
        start: Tick,
        adjustments: Option<&'a BTreeMap<u8, Vec<EngineEvent>>>,
        events: &'a [EngineEvent],
    ) -> Self {
        Self {
            start,
            adjustments,
            events: events.iter().peekable(),
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = (Tick, Vec<&'a EngineEvent>);

    fn next(&mut self) -> Option<Self::Item> {
        // Adjustments go out first, stamped at the measure start.
        let mut chunk: Vec<&'a EngineEvent> = self
            .adjustments
            .take()
            .map(|adjustments| adjustments.values().flatten().collect())
            .unwrap_or_default();

        let tick = if chunk.is_empty() {
            let first = self.events.next()?;
            chunk.push(first);
            first.ticks()
        } else {
            self.start
        };

        while let Some(event) = self.events.next_if(|e| e.ticks() == tick) {
            chunk.push(event);
        }

        Some((tick, chunk))
    }
}
