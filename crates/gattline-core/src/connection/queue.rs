// Input/output queues behind the dispatcher.
//
// Pure bookkeeping: the engine decides when to drain and what to issue.
// The output side never holds more than one context.

use std::collections::VecDeque;

use crate::command::CommandContext;

#[derive(Default)]
pub(crate) struct CommandQueue {
    input: VecDeque<CommandContext>,
    /// Sent (or about to be sent after a delay), awaiting completion.
    output: Option<CommandContext>,
    /// A subscription toggle waiting out its delay. Blocks draining like
    /// an in-flight command.
    deferred: Option<CommandContext>,
}

impl CommandQueue {
    pub fn push(&mut self, ctx: CommandContext) {
        self.input.push_back(ctx);
    }

    /// Jump the queue. Used for follow-ups the connection issues itself.
    pub fn push_front(&mut self, ctx: CommandContext) {
        self.input.push_front(ctx);
    }

    pub fn is_busy(&self) -> bool {
        self.output.is_some() || self.deferred.is_some()
    }

    pub fn pop_input(&mut self) -> Option<CommandContext> {
        self.input.pop_front()
    }

    /// Move `ctx` to the output side. The caller must have checked `is_busy`.
    pub fn begin(&mut self, ctx: CommandContext) {
        debug_assert!(!self.is_busy(), "second command issued while one is in flight");
        self.output = Some(ctx);
    }

    pub fn defer(&mut self, ctx: CommandContext) {
        debug_assert!(!self.is_busy(), "deferred command while one is in flight");
        self.deferred = Some(ctx);
    }

    pub fn take_deferred(&mut self) -> Option<CommandContext> {
        self.deferred.take()
    }

    pub fn in_flight(&self) -> Option<&CommandContext> {
        self.output.as_ref()
    }

    pub fn in_flight_mut(&mut self) -> Option<&mut CommandContext> {
        self.output.as_mut()
    }

    pub fn finish(&mut self) -> Option<CommandContext> {
        self.output.take()
    }

    pub fn pending_len(&self) -> usize {
        self.input.len()
    }

    /// Pull every queued context of `batch` out of the input side.
    pub fn take_batch(&mut self, batch: u64) -> Vec<CommandContext> {
        let (taken, kept): (VecDeque<_>, VecDeque<_>) = self
            .input
            .drain(..)
            .partition(|ctx| ctx.batch == Some(batch));
        self.input = kept;
        let mut taken: Vec<_> = taken.into();
        if self.deferred.as_ref().is_some_and(|ctx| ctx.batch == Some(batch)) {
            taken.extend(self.deferred.take());
        }
        taken
    }

    /// Empty everything, in-flight first then input order.
    pub fn drain_all(&mut self) -> Vec<CommandContext> {
        let mut drained = Vec::with_capacity(self.input.len() + 2);
        drained.extend(self.output.take());
        drained.extend(self.deferred.take());
        drained.extend(self.input.drain(..));
        drained
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::model::uuid_from_short;

    fn ctx(short: u16) -> CommandContext {
        CommandContext::internal(
            Command::read(uuid_from_short(0x180a), uuid_from_short(short)),
            "test",
        )
    }

    #[test]
    fn fifo_with_front_insertion() {
        let mut queue = CommandQueue::default();
        queue.push(ctx(1));
        queue.push(ctx(2));
        queue.push_front(ctx(3));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_input())
            .map(|c| c.command.item())
            .collect();
        assert_eq!(
            order,
            vec![uuid_from_short(3), uuid_from_short(1), uuid_from_short(2)]
        );
    }

    #[test]
    fn busy_while_in_flight_or_deferred() {
        let mut queue = CommandQueue::default();
        assert!(!queue.is_busy());

        queue.begin(ctx(1));
        assert!(queue.is_busy());
        assert!(queue.finish().is_some());
        assert!(!queue.is_busy());

        queue.defer(ctx(2));
        assert!(queue.is_busy());
        assert!(queue.take_deferred().is_some());
        assert!(!queue.is_busy());
    }

    #[test]
    fn drain_all_puts_in_flight_first() {
        let mut queue = CommandQueue::default();
        queue.push(ctx(2));
        queue.push(ctx(3));
        queue.begin(ctx(1));

        let drained: Vec<_> = queue.drain_all().into_iter().map(|c| c.command.item()).collect();
        assert_eq!(
            drained,
            vec![uuid_from_short(1), uuid_from_short(2), uuid_from_short(3)]
        );
        assert!(!queue.is_busy());
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn take_batch_keeps_other_commands_in_order() {
        let in_batch = |short| CommandContext {
            batch: Some(7),
            ..ctx(short)
        };
        let mut queue = CommandQueue::default();
        queue.push(in_batch(1));
        queue.push(ctx(2));
        queue.push(in_batch(3));
        queue.push(ctx(4));

        let taken: Vec<_> = queue.take_batch(7).into_iter().map(|c| c.command.item()).collect();
        assert_eq!(taken, vec![uuid_from_short(1), uuid_from_short(3)]);

        let left: Vec<_> = std::iter::from_fn(|| queue.pop_input())
            .map(|c| c.command.item())
            .collect();
        assert_eq!(left, vec![uuid_from_short(2), uuid_from_short(4)]);
    }
}
