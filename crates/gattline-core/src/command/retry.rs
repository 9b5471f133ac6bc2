use super::Command;

/// Decides what happens when an in-flight command times out.
///
/// `attempt` counts timeouts seen so far for this command, starting at 1.
/// Returning `true` re-issues the same command with a fresh timeout;
/// `false` fails it. Enforcing a retry ceiling is up to the policy.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, command: &Command, attempt: u32) -> bool;
}

impl<F> RetryPolicy for F
where
    F: Fn(&Command, u32) -> bool + Send + Sync,
{
    fn should_retry(&self, command: &Command, attempt: u32) -> bool {
        self(command, attempt)
    }
}

/// Retry up to `n` times, then fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxRetries(pub u32);

impl RetryPolicy for MaxRetries {
    fn should_retry(&self, _command: &Command, attempt: u32) -> bool {
        attempt <= self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::model::uuid_from_short;

    #[test]
    fn closures_are_policies() {
        let only_reads = |cmd: &Command, attempt: u32| cmd.kind() == CommandKind::Read && attempt < 3;
        let read = Command::read(uuid_from_short(0x180a), uuid_from_short(0x2a29));
        let write = Command::write(uuid_from_short(0x180a), uuid_from_short(0x2a29), vec![1]);

        assert!(only_reads.should_retry(&read, 2));
        assert!(!only_reads.should_retry(&read, 3));
        assert!(!only_reads.should_retry(&write, 1));
    }

    #[test]
    fn zero_retries_fails_first_timeout() {
        let read = Command::read(uuid_from_short(0x180a), uuid_from_short(0x2a29));
        assert!(!MaxRetries(0).should_retry(&read, 1));
    }
}
