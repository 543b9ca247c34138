use crate::state::{RenderState, StateChange};

/// Buffers a frame draws from, as the sink's backend sees them.
pub struct FrameResources<'a, U> {
    pub vertices: &'a U,
    pub indices: &'a U,
    pub instances: Option<&'a U>,
    pub commands: &'a U,
    pub instance_indices: &'a U,
}

/// One multi-draw over a contiguous run of indirect commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiDrawCall {
    pub command_offset_b: u64,
    pub command_count: u32,
    pub stride: u32,
    /// First entry of this batch in the instance index buffer. Command
    /// `base_instance` values are relative to it.
    pub instance_offset: u32,
}

/// Receiver of submitted draw work.
pub trait DrawSink<U> {
    /// Called once per submit, before any state or draw.
    fn begin(&mut self, _resources: &FrameResources<'_, U>) {}

    fn apply_state(
        &mut self,
        change: &StateChange,
        state: &RenderState,
        resources: &FrameResources<'_, U>,
    );

    fn multi_draw(&mut self, call: &MultiDrawCall, resources: &FrameResources<'_, U>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    State { change: StateChange, state: RenderState },
    Draw(MultiDrawCall),
}

/// Sink that records what it was asked to do. Used headless and in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Vec<SinkEvent>,
    frames: u32,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    pub fn draws(&self) -> impl Iterator<Item = &MultiDrawCall> {
        self.events.iter().filter_map(|e| match e {
            SinkEvent::Draw(call) => Some(call),
            SinkEvent::State { .. } => None,
        })
    }

    pub fn state_changes(&self) -> impl Iterator<Item = &StateChange> {
        self.events.iter().filter_map(|e| match e {
            SinkEvent::State { change, .. } => Some(change),
            SinkEvent::Draw(_) => None,
        })
    }

    /// Submits that reached this sink.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl<U> DrawSink<U> for RecordingSink {
    fn begin(&mut self, _: &FrameResources<'_, U>) {
        self.frames += 1;
    }

    fn apply_state(&mut self, change: &StateChange, state: &RenderState, _: &FrameResources<'_, U>) {
        self.events.push(SinkEvent::State {
            change: *change,
            state: *state,
        });
    }

    fn multi_draw(&mut self, call: &MultiDrawCall, _: &FrameResources<'_, U>) {
        self.events.push(SinkEvent::Draw(*call));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpubatch_arena::HostUploadTarget;

    /// Counts draws only, leaving `begin` to the trait default.
    #[derive(Default)]
    struct DrawCounter {
        draws: u32,
    }

    impl<U> DrawSink<U> for DrawCounter {
        fn apply_state(&mut self, _: &StateChange, _: &RenderState, _: &FrameResources<'_, U>) {}

        fn multi_draw(&mut self, _: &MultiDrawCall, _: &FrameResources<'_, U>) {
            self.draws += 1;
        }
    }

    fn call() -> MultiDrawCall {
        MultiDrawCall {
            command_offset_b: 0,
            command_count: 1,
            stride: 20,
            instance_offset: 0,
        }
    }

    #[test]
    fn default_begin_leaves_sink_untouched() {
        let target = HostUploadTarget::new();
        let resources = FrameResources {
            vertices: &target,
            indices: &target,
            instances: None,
            commands: &target,
            instance_indices: &target,
        };
        let mut sink = DrawCounter::default();
        sink.begin(&resources);
        assert_eq!(sink.draws, 0);
        sink.multi_draw(&call(), &resources);
        assert_eq!(sink.draws, 1);
        assert!(target.calls().is_empty());
    }

    #[test]
    fn recording_sink_counts_frames_and_draws() {
        let target = HostUploadTarget::new();
        let resources = FrameResources {
            vertices: &target,
            indices: &target,
            instances: Some(&target),
            commands: &target,
            instance_indices: &target,
        };
        let mut sink = RecordingSink::new();
        sink.begin(&resources);
        sink.multi_draw(&call(), &resources);
        assert_eq!(sink.frames(), 1);
        assert_eq!(sink.draws().count(), 1);
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
