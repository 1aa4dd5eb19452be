//! Call metrics recorded through the `metrics` facade
//!
//! Nothing here installs a recorder; without one every call is a no-op.

use crate::domain::call::{CallRole, TerminationReason};
use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(
        "chatcall_sessions_started_total",
        "Total number of call sessions started, by role"
    );
    describe_counter!(
        "chatcall_calls_answered_total",
        "Total number of calls that completed the offer/answer exchange"
    );
    describe_counter!(
        "chatcall_ice_candidates_sent_total",
        "Total number of local ICE candidates written to the call document"
    );
    describe_counter!(
        "chatcall_ice_candidates_applied_total",
        "Total number of remote ICE candidates added to the peer connection"
    );
    describe_counter!(
        "chatcall_ice_candidates_dropped_total",
        "Total number of ICE candidates dropped by write failures or missing remote description"
    );
    describe_counter!(
        "chatcall_sessions_ended_total",
        "Total number of call sessions ended, by outcome"
    );
    describe_gauge!(
        "chatcall_active_sessions",
        "Number of call sessions currently owned by this process"
    );
}

pub fn record_session_started(role: CallRole) {
    counter!("chatcall_sessions_started_total", "role" => role.as_str()).increment(1);
    gauge!("chatcall_active_sessions").increment(1.0);
}

pub fn record_session_ended(reason: &TerminationReason) {
    counter!("chatcall_sessions_ended_total", "outcome" => reason.as_str()).increment(1);
    gauge!("chatcall_active_sessions").decrement(1.0);
}

pub fn record_call_answered() {
    counter!("chatcall_calls_answered_total").increment(1);
}

pub fn record_ice_sent() {
    counter!("chatcall_ice_candidates_sent_total").increment(1);
}

pub fn record_ice_applied() {
    counter!("chatcall_ice_candidates_applied_total").increment(1);
}

pub fn record_ice_dropped(cause: &'static str) {
    counter!("chatcall_ice_candidates_dropped_total", "cause" => cause).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        record_session_started(CallRole::Caller);
        record_ice_sent();
        record_ice_dropped("no_remote_description");
        record_session_ended(&TerminationReason::LocalStop);
    }
}
