use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    Transient,
    SchemaMismatch,
    /// Only meaningful for writes; sources report it as a schema mismatch.
    Constraint,
    /// Sleep before serving the call normally.
    Delay(Duration),
}

/// When an injected fault fires.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultPlan {
    fault: Fault,
    skip: u32,
    remaining: Option<u32>,
}

impl FaultPlan {
    /// Fires on every call until limited with [`FaultPlan::times`].
    pub fn new(fault: Fault) -> Self {
        Self {
            fault,
            skip: 0,
            remaining: None,
        }
    }

    pub fn times(mut self, times: u32) -> Self {
        self.remaining = Some(times);
        self
    }

    /// Lets `calls` calls through untouched first.
    pub fn after(mut self, calls: u32) -> Self {
        self.skip = calls;
        self
    }

    /// Consumes one call, returning the fault to apply to it.
    pub fn next(&mut self) -> Option<Fault> {
        if self.skip > 0 {
            self.skip -= 1;
            return None;
        }

        match &mut self.remaining {
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.fault.clone())
            }
            None => Some(self.fault.clone()),
        }
    }
}
