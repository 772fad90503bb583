mod support;

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use roulette_lib::coordinator::{Command, Event, SessionCoordinator, Settings};
use roulette_lib::error::MediaError;
use roulette_lib::media::{MediaHandle, RemoteMedia};
use roulette_lib::peer::{PeerLinkEvent, PeerSignal};
use roulette_lib::session::SessionState;
use roulette_lib::signaling::SignalingEvent;

use support::{addr, sid, FakeMedia, FakePeerLink, FakeSignaling, LinkLog};

const SESSIONS: [&str; 3] = ["r0", "r1", "r2"];
const PEERS: [&str; 3] = ["P0", "P2", "P3"];

#[derive(Debug, Clone)]
enum Op {
    Start,
    Leave,
    Chat,
    Connected,
    Disconnected,
    Assigned(usize),
    Joined(usize, usize),
    Left(usize),
    Offer(usize, usize),
    Stream(usize, usize),
    Failed(usize, usize),
    Lost(usize, usize),
    MediaReady,
    MediaFailed,
    Deadline,
    SignalingGrace,
    JoinError,
    Drain,
}

fn op() -> impl Strategy<Value = Op> {
    let s = 0..SESSIONS.len();
    let p = 0..PEERS.len();
    prop_oneof![
        Just(Op::Start),
        Just(Op::Leave),
        Just(Op::Chat),
        Just(Op::Connected),
        Just(Op::Disconnected),
        s.clone().prop_map(Op::Assigned),
        (s.clone(), p.clone()).prop_map(|(s, p)| Op::Joined(s, p)),
        s.clone().prop_map(Op::Left),
        (s.clone(), p.clone()).prop_map(|(s, p)| Op::Offer(s, p)),
        (s.clone(), p.clone()).prop_map(|(s, p)| Op::Stream(s, p)),
        (s.clone(), p.clone()).prop_map(|(s, p)| Op::Failed(s, p)),
        (s, p).prop_map(|(s, p)| Op::Lost(s, p)),
        Just(Op::MediaReady),
        Just(Op::MediaFailed),
        Just(Op::Deadline),
        Just(Op::SignalingGrace),
        Just(Op::JoinError),
        Just(Op::Drain),
    ]
}

struct Rig {
    coordinator: SessionCoordinator,
    signaling: Arc<FakeSignaling>,
    _signaling_tx: mpsc::UnboundedSender<SignalingEvent>,
    _peer_tx: mpsc::UnboundedSender<PeerLinkEvent>,
}

impl Rig {
    fn new() -> Self {
        let signaling = Arc::new(FakeSignaling::default());
        let (signaling_tx, signaling_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (coordinator, _handle) = SessionCoordinator::new(
            Settings::default(),
            addr("P1"),
            Arc::new(FakeMedia::ready()),
            signaling.clone(),
            Box::new(FakePeerLink::new(LinkLog::default())),
            signaling_rx,
            peer_rx,
        );
        Self {
            coordinator,
            signaling,
            _signaling_tx: signaling_tx,
            _peer_tx: peer_tx,
        }
    }

    fn apply(&mut self, op: Op) {
        let epoch = self.coordinator.session().epoch;
        let event = match op {
            Op::Start => Command::StartSearch.into(),
            Op::Leave => Command::Leave.into(),
            Op::Chat => Command::SendChat("hi".into()).into(),
            Op::Connected => SignalingEvent::Connected.into(),
            Op::Disconnected => SignalingEvent::Disconnected {
                reason: "gone".into(),
            }
            .into(),
            Op::Assigned(s) => SignalingEvent::Assigned {
                session_id: sid(SESSIONS[s]),
            }
            .into(),
            Op::Joined(s, p) => SignalingEvent::PeerJoined {
                session_id: sid(SESSIONS[s]),
                remote: addr(PEERS[p]),
            }
            .into(),
            Op::Left(s) => SignalingEvent::PeerLeft {
                session_id: sid(SESSIONS[s]),
            }
            .into(),
            Op::Offer(s, p) => SignalingEvent::PeerSignal {
                session_id: sid(SESSIONS[s]),
                from: addr(PEERS[p]),
                signal: PeerSignal::Offer { sdp: "o".into() },
            }
            .into(),
            Op::Stream(s, p) => PeerLinkEvent::RemoteStreamArrived {
                session_id: sid(SESSIONS[s]),
                remote: addr(PEERS[p]),
                stream: RemoteMedia::new("remote"),
            }
            .into(),
            Op::Failed(s, p) => PeerLinkEvent::NegotiationFailed {
                session_id: sid(SESSIONS[s]),
                remote: addr(PEERS[p]),
                reason: "ice".into(),
            }
            .into(),
            Op::Lost(s, p) => PeerLinkEvent::LinkLost {
                session_id: sid(SESSIONS[s]),
                remote: addr(PEERS[p]),
            }
            .into(),
            Op::MediaReady => Event::MediaReady {
                epoch,
                result: Ok(MediaHandle::new("local")),
            },
            Op::MediaFailed => Event::MediaReady {
                epoch,
                result: Err(MediaError::Busy("camera".into())),
            },
            Op::Deadline => Event::NegotiationDeadline { epoch },
            // номер простоя заранее неизвестен, берём небольшой
            Op::SignalingGrace => Event::SignalingGraceElapsed { outage: 1 },
            Op::JoinError => SignalingEvent::JoinError {
                reason: "full".into(),
            }
            .into(),
            Op::Drain => {
                self.coordinator.drain_ready();
                return;
            }
        };
        self.coordinator.handle_event(event);
    }

    fn leaves_at_most_once(&self) -> bool {
        let mut counts = HashMap::new();
        for id in self.signaling.leaves() {
            *counts.entry(id).or_insert(0) += 1;
        }
        counts.values().all(|n| *n == 1)
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn remote_is_known_only_while_matched(ops in prop::collection::vec(op(), 1..60)) {
        let rt = runtime();
        let _guard = rt.enter();
        let mut rig = Rig::new();

        for op in ops {
            rig.apply(op.clone());
            let session = rig.coordinator.session();
            prop_assert!(session.invariant_holds(), "after {:?}: {:?}", op, session);
            if session.state == SessionState::Active {
                prop_assert!(session.remote_media.is_some());
            } else {
                prop_assert!(session.remote_media.is_none());
                prop_assert!(rig.coordinator.chat().is_empty());
            }
            prop_assert!(rig.leaves_at_most_once(), "leaves: {:?}", rig.signaling.leaves());
        }
    }

    #[test]
    fn double_leave_always_lands_in_idle(ops in prop::collection::vec(op(), 0..40)) {
        let rt = runtime();
        let _guard = rt.enter();
        let mut rig = Rig::new();
        for op in ops {
            rig.apply(op);
        }

        rig.apply(Op::Leave);
        rig.apply(Op::Leave);
        rig.apply(Op::Drain);

        prop_assert_eq!(rig.coordinator.session().state, SessionState::Idle);
        prop_assert!(rig.coordinator.session().remote.is_none());
        prop_assert!(rig.leaves_at_most_once(), "leaves: {:?}", rig.signaling.leaves());
    }
}
