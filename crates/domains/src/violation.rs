//! # Violation policy
//!
//! Anti-abuse state machine over a server's `(violation_count, blacklisted)`.
//! A GUID shared by several installations keeps flipping its reported
//! versions; each flip is a violation and enough of them blacklist the GUID.

use crate::models::Server;

/// Violations tolerated before a server is blacklisted.
pub const MAX_VIOLATIONS: i32 = 7;

/// What the pipeline should do with the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep processing.
    Proceed,
    /// Keep processing this request, but persist the blacklist so the next
    /// one is refused.
    ProceedAndBlacklist,
    /// Refuse outright.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationPolicy {
    max_violations: i32,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        Self {
            max_violations: MAX_VIOLATIONS,
        }
    }
}

impl ViolationPolicy {
    pub fn max_violations(&self) -> i32 {
        self.max_violations
    }

    /// The external blacklist is only consulted for servers still under the
    /// threshold.
    pub fn needs_blacklist_lookup(&self, server: &Server) -> bool {
        server.violation_count < self.max_violations
    }

    /// Applies the policy to `server` in place.
    ///
    /// `externally_blacklisted` is the result of the GUID lookup; it is
    /// ignored when [`needs_blacklist_lookup`](Self::needs_blacklist_lookup)
    /// is false.
    pub fn evaluate(&self, server: &mut Server, externally_blacklisted: bool) -> Verdict {
        if self.needs_blacklist_lookup(server) && externally_blacklisted {
            server.violation_count = self.max_violations;
            server.blacklisted = true;
        }

        if server.blacklisted {
            return Verdict::Reject;
        }

        if server.violation_count >= self.max_violations {
            server.blacklisted = true;
            return Verdict::ProceedAndBlacklist;
        }

        Verdict::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(violations: i32, blacklisted: bool) -> Server {
        let mut server = Server::new(1, "guid");
        server.violation_count = violations;
        server.blacklisted = blacklisted;
        server
    }

    #[test]
    fn clean_server_proceeds() {
        let mut s = server(0, false);
        assert_eq!(ViolationPolicy::default().evaluate(&mut s, false), Verdict::Proceed);
        assert_eq!((s.violation_count, s.blacklisted), (0, false));
    }

    #[test]
    fn externally_listed_guid_is_escalated_and_rejected() {
        let mut s = server(2, false);
        assert_eq!(ViolationPolicy::default().evaluate(&mut s, true), Verdict::Reject);
        assert_eq!((s.violation_count, s.blacklisted), (MAX_VIOLATIONS, true));
    }

    #[test]
    fn blacklisted_server_is_rejected() {
        let mut s = server(0, true);
        assert_eq!(ViolationPolicy::default().evaluate(&mut s, false), Verdict::Reject);
    }

    #[test]
    fn reaching_threshold_blacklists_but_serves_once_more() {
        let mut s = server(MAX_VIOLATIONS, false);
        let policy = ViolationPolicy::default();
        assert!(!policy.needs_blacklist_lookup(&s));
        assert_eq!(policy.evaluate(&mut s, false), Verdict::ProceedAndBlacklist);
        assert!(s.blacklisted);

        // The following request is refused.
        assert_eq!(policy.evaluate(&mut s, false), Verdict::Reject);
    }

    #[test]
    fn lookup_result_is_ignored_at_threshold() {
        let mut s = server(MAX_VIOLATIONS + 3, false);
        let verdict = ViolationPolicy::default().evaluate(&mut s, true);
        assert_eq!(verdict, Verdict::ProceedAndBlacklist);
        assert_eq!(s.violation_count, MAX_VIOLATIONS + 3);
    }
}
