//! Property tests for the port-scan state machine

use linkwatch_core::scan::{PortMachine, ScanEvent, ScanState, Verdict};
use proptest::prelude::*;

/// Drives one full toggle attempt ending with `verdict`
fn run_attempt(machine: &mut PortMachine, verdict: Verdict) -> ScanState {
    for event in [
        ScanEvent::CommandOk,
        ScanEvent::WaitElapsed,
        ScanEvent::CommandOk,
        ScanEvent::WaitElapsed,
    ] {
        machine.handle(event).unwrap();
    }
    machine.handle(ScanEvent::Verdict(verdict)).unwrap()
}

proptest! {
    /// Property: always-failing eye scans end in Fail after exactly `limit` attempts
    #[test]
    fn failing_port_uses_every_attempt(limit in 1u32..10) {
        let mut machine = PortMachine::new(limit);
        machine.handle(ScanEvent::Begin).unwrap();

        let mut attempts = 0;
        loop {
            attempts += 1;
            let state = run_attempt(&mut machine, Verdict::Fail);
            if state.is_terminal() {
                prop_assert_eq!(state, ScanState::Fail);
                break;
            }
            prop_assert_eq!(state, ScanState::ToggleOff);
        }
        prop_assert_eq!(attempts, limit);
        prop_assert_eq!(machine.attempt(), limit);
    }

    /// Property: a first pass at attempt k ends in Pass with k attempts
    #[test]
    fn pass_at_attempt_k((limit, k) in (1u32..10).prop_flat_map(|l| (Just(l), 1..=l))) {
        let mut machine = PortMachine::new(limit);
        machine.handle(ScanEvent::Begin).unwrap();

        for _ in 1..k {
            prop_assert_eq!(run_attempt(&mut machine, Verdict::Fail), ScanState::ToggleOff);
        }
        prop_assert_eq!(run_attempt(&mut machine, Verdict::Pass), ScanState::Pass);
        prop_assert_eq!(machine.attempt(), k);
    }

    /// Property: a lost connection aborts from every non-idle state
    #[test]
    fn connection_loss_always_aborts(steps in 0usize..5, limit in 1u32..4) {
        let mut machine = PortMachine::new(limit);
        machine.handle(ScanEvent::Begin).unwrap();
        let script = [
            ScanEvent::CommandOk,
            ScanEvent::WaitElapsed,
            ScanEvent::CommandOk,
            ScanEvent::WaitElapsed,
        ];
        for event in script.into_iter().take(steps) {
            machine.handle(event).unwrap();
        }

        let state = machine
            .handle(ScanEvent::ConnectionLost("link down".into()))
            .unwrap();
        prop_assert_eq!(state, ScanState::Aborted);
        prop_assert_eq!(machine.abort_reason(), Some("link down"));
        prop_assert!(machine.handle(ScanEvent::Begin).is_err());
    }
}
