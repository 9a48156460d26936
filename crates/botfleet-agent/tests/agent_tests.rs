//! Tests for botfleet-agent: Behavior, scanner, trap planner, and run_unit over the sim world

use botfleet_agent::sim::{SimConnector, SimWorld};
use botfleet_agent::*;
use botfleet_core::{
    AgentHandle, BehaviorConfig, BlockPos, Command, LogLevel, ServerConfig, UnitEvent, Vec3,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

type EventRx = mpsc::UnboundedReceiver<(UnitId, UnitEvent)>;

const GROUND: i32 = botfleet_agent::sim::DEFAULT_GROUND_Y;

fn standing(x: f64, z: f64) -> Vec3 {
    Vec3::new(x, (GROUND + 1) as f64, z)
}

fn behavior_with(config: BehaviorConfig) -> (Behavior, EventRx) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = Reporter::new(UnitId(1), tx);
    let b = Behavior::new(Arc::new(config), reporter, Arc::new(Preempt::default()));
    (b, rx)
}

fn behavior() -> (Behavior, EventRx) {
    behavior_with(BehaviorConfig::default())
}

fn drain(rx: &mut EventRx) -> Vec<UnitEvent> {
    let mut out = Vec::new();
    while let Ok((_, ev)) = rx.try_recv() {
        out.push(ev);
    }
    out
}

fn world_with_bob(bob: Vec3) -> SimWorld {
    let w = SimWorld::detached();
    w.set_position(standing(0.5, 0.5));
    w.add_player("Bob", bob);
    w
}

// ===========================================================================
// Commands
// ===========================================================================

#[tokio::test]
async fn unresolvable_target_leaves_state_unchanged() {
    let w = SimWorld::detached();
    let (mut b, mut rx) = behavior();

    for cmd in [
        Command::Follow { target: "Ghost".into() },
        Command::Grief { target: "Ghost".into() },
        Command::Trap { target: "Ghost".into() },
    ] {
        b.handle_command(&w, cmd).await.unwrap();
        assert_eq!(b.state().mode(), Mode::None);
        assert!(b.state().target().is_none());
    }
    assert_eq!(w.goals_set(), 0);

    let events = drain(&mut rx);
    assert_eq!(
        events[0],
        UnitEvent::warn("Cannot follow Ghost: player not visible")
    );
    assert_eq!(events.len(), 3);
    assert!(events
        .iter()
        .all(|e| matches!(e, UnitEvent::Log { level: LogLevel::Warn, .. })));
}

#[tokio::test]
async fn rejected_target_keeps_previous_mode() {
    let w = world_with_bob(standing(2.5, 0.5));
    let (mut b, _rx) = behavior();

    b.handle_command(&w, Command::Follow { target: "Bob".into() })
        .await
        .unwrap();
    b.handle_command(&w, Command::Grief { target: "Ghost".into() })
        .await
        .unwrap();
    assert_eq!(b.state().mode(), Mode::Follow);
    assert_eq!(b.state().target(), Some("Bob"));
}

#[tokio::test]
async fn engage_reports_status() {
    let w = world_with_bob(standing(2.5, 0.5));
    let (mut b, mut rx) = behavior();

    b.handle_command(&w, Command::Grief { target: "Bob".into() })
        .await
        .unwrap();
    assert_eq!(b.state().mode(), Mode::Grief);
    assert_eq!(drain(&mut rx), vec![UnitEvent::status("Griefing Bob")]);

    b.handle_command(&w, Command::Clearmap { angle: 1.0 })
        .await
        .unwrap();
    assert_eq!(b.state().mode(), Mode::Clearmap);
    assert!(b.state().target().is_none());
    assert_eq!(drain(&mut rx), vec![UnitEvent::status("Clearing map")]);
}

#[tokio::test]
async fn stop_always_returns_to_idle() {
    let w = world_with_bob(standing(2.5, 0.5));
    w.give("obsidian", 64);
    let (mut b, mut rx) = behavior();
    let now = Instant::now();

    b.handle_command(&w, Command::Follow { target: "Bob".into() })
        .await
        .unwrap();
    b.on_tick(&w, now).await.unwrap();
    b.handle_command(&w, Command::Grief { target: "Bob".into() })
        .await
        .unwrap();
    b.on_tick(&w, now).await.unwrap();
    b.handle_command(&w, Command::Clearmap { angle: 0.5 })
        .await
        .unwrap();
    b.on_tick(&w, now).await.unwrap();
    b.handle_command(&w, Command::Trap { target: "Bob".into() })
        .await
        .unwrap();
    b.handle_command(&w, Command::Stop).await.unwrap();

    assert_eq!(b.state().mode(), Mode::None);
    assert!(b.state().target().is_none());
    assert!(!b.state().is_building());
    assert!(w.goal().is_none());
    assert_eq!(drain(&mut rx).last(), Some(&UnitEvent::status("Idle")));
}

#[tokio::test]
async fn chat_is_forwarded_without_touching_mode() {
    let w = world_with_bob(standing(2.5, 0.5));
    let (mut b, _rx) = behavior();

    b.handle_command(&w, Command::Follow { target: "Bob".into() })
        .await
        .unwrap();
    b.handle_command(&w, Command::Chat { message: "hello".into() })
        .await
        .unwrap();
    assert_eq!(w.chat_log(), vec!["hello".to_string()]);
    assert_eq!(b.state().mode(), Mode::Follow);
}

// ===========================================================================
// Ticks
// ===========================================================================

#[tokio::test]
async fn idle_tick_does_nothing() {
    let w = SimWorld::detached();
    let (mut b, mut rx) = behavior();
    b.on_tick(&w, Instant::now()).await.unwrap();
    assert_eq!(w.goals_set(), 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn follow_tick_sets_near_goal() {
    let bob = standing(5.5, 0.5);
    let w = world_with_bob(bob);
    let (mut b, _rx) = behavior();

    b.handle_command(&w, Command::Follow { target: "Bob".into() })
        .await
        .unwrap();
    b.on_tick(&w, Instant::now()).await.unwrap();
    assert_eq!(
        w.goal(),
        Some(Goal::Near {
            pos: bob,
            range: BehaviorConfig::default().follow_range
        })
    );
}

#[tokio::test]
async fn lost_target_goes_idle() {
    let w = world_with_bob(standing(5.5, 0.5));
    let (mut b, mut rx) = behavior();

    b.handle_command(&w, Command::Follow { target: "Bob".into() })
        .await
        .unwrap();
    b.on_tick(&w, Instant::now()).await.unwrap();
    drain(&mut rx);

    w.remove_player("Bob");
    b.on_tick(&w, Instant::now()).await.unwrap();

    assert_eq!(b.state().mode(), Mode::None);
    assert!(w.goal().is_none());
    assert_eq!(
        drain(&mut rx),
        vec![
            UnitEvent::info("Lost sight of Bob"),
            UnitEvent::status("Idle")
        ]
    );
}

#[tokio::test]
async fn clearmap_sets_goal_along_angle_once() {
    let w = SimWorld::detached();
    w.set_position(standing(0.5, 0.5));
    let (mut b, _rx) = behavior();
    let angle = std::f64::consts::FRAC_PI_2;

    b.handle_command(&w, Command::Clearmap { angle }).await.unwrap();
    b.on_tick(&w, Instant::now()).await.unwrap();

    let Some(Goal::Xz { x, z }) = w.goal() else {
        panic!("expected an xz goal");
    };
    assert!((x - 0.5).abs() < 1e-6);
    assert!((z - 10_000.5).abs() < 1e-6);

    // Still navigating: no new goal.
    b.on_tick(&w, Instant::now()).await.unwrap();
    assert_eq!(w.goals_set(), 1);
}

// ===========================================================================
// Scanner
// ===========================================================================

#[test]
fn candidates_sorted_and_unprotected() {
    let w = SimWorld::detached();
    w.set_position(standing(0.5, 0.5));
    w.set_block(BlockPos::new(1, GROUND, 0), "bedrock");
    w.set_block(BlockPos::new(0, GROUND, 1), "water");
    w.set_block(BlockPos::new(-1, GROUND + 1, 0), "barrier");
    w.set_block(BlockPos::new(1, GROUND + 1, 1), "oak_log");
    let config = BehaviorConfig::default();

    let found = scan::find_candidates(&w, standing(1.5, 0.5), w.position(), &config);
    assert!(!found.is_empty());
    for pair in found.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    for c in &found {
        let name = w.block_at(c.pos).unwrap().name;
        assert!(!config.is_protected(&name), "selected protected {}", name);
        assert!(c.distance <= config.max_action_distance);
    }
    assert!(found.iter().any(|c| c.pos == BlockPos::new(1, GROUND + 1, 1)));
}

#[tokio::test]
async fn grief_never_digs_protected_blocks() {
    let w = world_with_bob(standing(1.5, 0.5));
    w.fill(
        BlockPos::new(-6, GROUND - 6, -6),
        BlockPos::new(6, GROUND + 6, 6),
        "barrier",
    );
    let (mut b, _rx) = behavior();
    b.handle_command(&w, Command::Grief { target: "Bob".into() })
        .await
        .unwrap();

    let start = Instant::now();
    for i in 0..5 {
        b.on_tick(&w, start + Duration::from_secs(i)).await.unwrap();
    }
    assert!(w.dug().is_empty());

    let soft = BlockPos::new(1, GROUND, 0);
    w.set_block(soft, "stone");
    b.on_tick(&w, start + Duration::from_secs(10)).await.unwrap();
    assert_eq!(w.dug(), vec![soft]);
}

#[tokio::test]
async fn grief_respects_action_rate() {
    let w = world_with_bob(standing(1.5, 0.5));
    let (mut b, _rx) = behavior();
    b.handle_command(&w, Command::Grief { target: "Bob".into() })
        .await
        .unwrap();

    let interval = BehaviorConfig::default().action_interval();
    let t0 = Instant::now();
    b.on_tick(&w, t0).await.unwrap();
    b.on_tick(&w, t0 + interval / 2).await.unwrap();
    b.on_tick(&w, t0 + interval - Duration::from_millis(1)).await.unwrap();
    assert_eq!(w.dug().len(), 1);

    b.on_tick(&w, t0 + interval).await.unwrap();
    assert_eq!(w.dug().len(), 2);
}

#[tokio::test]
async fn failed_dig_is_swallowed_and_still_rate_limited() {
    let w = world_with_bob(standing(1.5, 0.5));
    w.set_failing(true);
    let (mut b, mut rx) = behavior();
    b.handle_command(&w, Command::Grief { target: "Bob".into() })
        .await
        .unwrap();
    drain(&mut rx);

    let t0 = Instant::now();
    b.on_tick(&w, t0).await.unwrap();
    assert!(b.state().last_action().is_some());
    assert!(w.dug().is_empty());
    assert_eq!(b.state().mode(), Mode::Grief);
    assert!(drain(&mut rx).is_empty());
}

// ===========================================================================
// Trap planner
// ===========================================================================

#[tokio::test]
async fn trap_far_target_approaches_first() {
    let bob = standing(20.5, 0.5);
    let w = world_with_bob(bob);
    w.give("obsidian", 64);
    let (mut b, _rx) = behavior();

    b.handle_command(&w, Command::Trap { target: "Bob".into() })
        .await
        .unwrap();
    b.on_tick(&w, Instant::now()).await.unwrap();
    assert_eq!(w.goal(), Some(Goal::Near { pos: bob, range: 1.0 }));
    assert!(w.placed().is_empty());
    assert_eq!(b.state().mode(), Mode::Trap);
}

#[tokio::test]
async fn trap_fills_bottom_up_then_follows() {
    let bob = standing(5.5, 0.5);
    let w = SimWorld::detached();
    w.set_position(standing(3.5, 0.5));
    w.add_player("Bob", bob);
    w.give("obsidian", 64);
    let (mut b, mut rx) = behavior();

    b.handle_command(&w, Command::Trap { target: "Bob".into() })
        .await
        .unwrap();
    drain(&mut rx);
    b.on_tick(&w, Instant::now()).await.unwrap();

    // The floor ring is already ground; walls and roof get built.
    let placed = w.placed();
    assert_eq!(placed.len(), 25);

    // Each placement had a solid neighbor at the time it was made.
    for (i, pos) in placed.iter().enumerate() {
        let supported = pos
            .neighbors()
            .any(|n| n.y <= GROUND || placed[..i].contains(&n));
        assert!(supported, "{} placed with no support", pos);
    }

    let origin = bob.block();
    assert!(w.block_at(origin).unwrap().is_empty());
    assert!(w.block_at(origin + BlockPos::new(0, 1, 0)).unwrap().is_empty());
    assert_eq!(w.block_at(origin + BlockPos::new(0, 2, 0)).unwrap().name, "obsidian");

    assert_eq!(b.state().mode(), Mode::Follow);
    assert!(!b.state().is_building());
    assert_eq!(
        drain(&mut rx),
        vec![
            UnitEvent::info("Trapped Bob (25 placed, 0 failed)"),
            UnitEvent::status("Following Bob"),
        ]
    );
}

#[tokio::test]
async fn trap_without_material_goes_idle() {
    let w = SimWorld::detached();
    w.set_position(standing(3.5, 0.5));
    w.add_player("Bob", standing(5.5, 0.5));
    let (mut b, mut rx) = behavior();

    b.handle_command(&w, Command::Trap { target: "Bob".into() })
        .await
        .unwrap();
    drain(&mut rx);
    b.on_tick(&w, Instant::now()).await.unwrap();

    assert_eq!(b.state().mode(), Mode::None);
    assert!(!b.state().is_building());
    assert!(w.placed().is_empty());
    assert_eq!(
        drain(&mut rx),
        vec![
            UnitEvent::warn("Cannot trap Bob: no obsidian in inventory"),
            UnitEvent::status("Idle"),
        ]
    );
}

#[tokio::test]
async fn operator_requests_material() {
    let w = SimWorld::detached();
    w.set_position(standing(3.5, 0.5));
    w.add_player("Bob", standing(5.5, 0.5));
    w.set_operator(true);
    let (mut b, _rx) = behavior();

    b.handle_command(&w, Command::Trap { target: "Bob".into() })
        .await
        .unwrap();
    b.on_tick(&w, Instant::now()).await.unwrap();

    assert_eq!(w.chat_log(), vec!["/give @s obsidian 64".to_string()]);
    assert_eq!(w.held().as_deref(), Some("obsidian"));
    assert_eq!(w.placed().len(), 25);
    assert_eq!(w.item_count("obsidian"), 64 - 25);
}

#[tokio::test]
async fn failed_placements_are_counted() {
    let w = SimWorld::detached();
    w.set_position(standing(3.5, 0.5));
    w.add_player("Bob", standing(5.5, 0.5));
    w.give("obsidian", 64);
    w.set_failing(true);
    let (mut b, mut rx) = behavior();

    b.handle_command(&w, Command::Trap { target: "Bob".into() })
        .await
        .unwrap();
    drain(&mut rx);
    b.on_tick(&w, Instant::now()).await.unwrap();

    assert!(w.placed().is_empty());
    let events = drain(&mut rx);
    let UnitEvent::Log { text, .. } = &events[0] else {
        panic!("expected a log event, got {:?}", events[0]);
    };
    assert!(text.starts_with("Trapped Bob (0 placed,"), "{}", text);
}

/// Sim world that fires a preemption after the `after`-th placement, the way
/// a command queued mid-build would.
struct InterruptingWorld {
    inner: SimWorld,
    preempt: Arc<Preempt>,
    after: usize,
    placements: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl GameWorld for InterruptingWorld {
    fn position(&self) -> Vec3 {
        self.inner.position()
    }
    fn player_position(&self, name: &str) -> Option<Vec3> {
        self.inner.player_position(name)
    }
    fn block_at(&self, pos: BlockPos) -> Option<botfleet_core::Block> {
        self.inner.block_at(pos)
    }
    fn set_goal(&self, goal: Option<Goal>) {
        self.inner.set_goal(goal)
    }
    fn is_navigating(&self) -> bool {
        self.inner.is_navigating()
    }
    fn item_count(&self, item: &str) -> u32 {
        self.inner.item_count(item)
    }
    fn is_operator(&self) -> bool {
        self.inner.is_operator()
    }
    async fn look_at(&self, pos: Vec3) -> Result<(), ActionError> {
        self.inner.look_at(pos).await
    }
    async fn dig(&self, pos: BlockPos) -> Result<(), ActionError> {
        self.inner.dig(pos).await
    }
    async fn equip(&self, item: &str) -> Result<(), ActionError> {
        self.inner.equip(item).await
    }
    async fn place_block(&self, against: BlockPos, face: BlockPos) -> Result<(), ActionError> {
        let result = self.inner.place_block(against, face).await;
        let n = self.placements.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if n == self.after {
            self.preempt.cancel_current();
        }
        result
    }
    async fn chat(&self, message: &str) -> Result<(), ActionError> {
        self.inner.chat(message).await
    }
    async fn request_supply(&self, item: &str, count: u32) -> Result<(), ActionError> {
        self.inner.request_supply(item, count).await
    }
    async fn quit(&self, reason: &str) {
        self.inner.quit(reason).await
    }
}

#[tokio::test]
async fn rejected_command_mid_build_keeps_trap_and_resumes() {
    let inner = SimWorld::detached();
    inner.set_position(standing(3.5, 0.5));
    inner.add_player("Bob", standing(5.5, 0.5));
    inner.give("obsidian", 64);
    let preempt = Arc::new(Preempt::default());
    let w = InterruptingWorld {
        inner,
        preempt: preempt.clone(),
        after: 5,
        placements: Default::default(),
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut b = Behavior::new(
        Arc::new(BehaviorConfig::default()),
        Reporter::new(UnitId(1), tx),
        preempt,
    );

    b.handle_command(&w, Command::Trap { target: "Bob".into() })
        .await
        .unwrap();
    drain(&mut rx);
    b.on_tick(&w, Instant::now()).await.unwrap();
    assert_eq!(w.inner.placed().len(), 5);
    assert_eq!(b.state().mode(), Mode::Trap);
    assert!(!b.state().is_building());
    assert!(drain(&mut rx).is_empty());

    b.handle_command(&w, Command::Follow { target: "Ghost".into() })
        .await
        .unwrap();
    assert_eq!(b.state().mode(), Mode::Trap);
    assert_eq!(b.state().target(), Some("Bob"));
    drain(&mut rx);

    b.on_tick(&w, Instant::now()).await.unwrap();
    assert_eq!(w.inner.placed().len(), 25);
    assert_eq!(
        drain(&mut rx),
        vec![
            UnitEvent::info("Trapped Bob (20 placed, 0 failed)"),
            UnitEvent::status("Following Bob"),
        ]
    );
}

// ===========================================================================
// Execution unit
// ===========================================================================

fn unit_spec(handle: &str, auth_flow: bool) -> UnitSpec {
    UnitSpec {
        id: UnitId(7),
        handle: AgentHandle::new(handle),
        auth_flow,
        server: ServerConfig::default(),
        behavior: Arc::new(BehaviorConfig::default()),
        accounts: None,
    }
}

async fn next_event(rx: &mut EventRx) -> UnitEvent {
    let (_, ev) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for unit event")
        .expect("event channel closed");
    ev
}

#[tokio::test]
async fn unit_follows_then_loses_target() {
    let connector = Arc::new(
        SimConnector::new().with_setup(|w| w.add_player("Bob", standing(4.5, 0.5))),
    );
    let (mailbox, inbox) = mailbox();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_unit(
        unit_spec("Alice", false),
        connector.clone(),
        inbox,
        Reporter::new(UnitId(7), tx),
    ));

    assert_eq!(
        next_event(&mut rx).await,
        UnitEvent::Authenticated {
            nickname: "Alice".into()
        }
    );

    assert!(mailbox.send(Command::Follow { target: "Bob".into() }));
    assert_eq!(next_event(&mut rx).await, UnitEvent::status("Following Bob"));

    let world = connector.world("Alice").unwrap();
    assert!(connector.tick("Alice"));
    tokio::time::timeout(Duration::from_secs(5), async {
        while world.goal().is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    world.remove_player("Bob");
    assert!(connector.tick("Alice"));
    assert_eq!(next_event(&mut rx).await, UnitEvent::info("Lost sight of Bob"));
    assert_eq!(next_event(&mut rx).await, UnitEvent::status("Idle"));

    drop(mailbox);
    assert_eq!(task.await.unwrap(), UnitExit::Clean);
    assert!(world.is_closed());
}

#[tokio::test]
async fn unit_reports_auth_link_and_records_account() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(AccountStore::new(dir.path().join("accounts.txt")));
    let connector = Arc::new(SimConnector::new().with_auth_names(["Steve"]));
    let (mailbox, inbox) = mailbox();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut spec = unit_spec("bot_1234abcd", true);
    spec.accounts = Some(store.clone());
    let task = tokio::spawn(run_unit(spec, connector, inbox, Reporter::new(UnitId(7), tx)));

    let UnitEvent::AuthLink { link, user_code } = next_event(&mut rx).await else {
        panic!("expected auth link first");
    };
    assert!(link.starts_with("https://"));
    assert_eq!(user_code.len(), 8);
    assert_eq!(
        next_event(&mut rx).await,
        UnitEvent::Authenticated {
            nickname: "Steve".into()
        }
    );
    let names: Vec<String> = store.load().await.unwrap().iter().map(|h| h.to_string()).collect();
    assert_eq!(names, vec!["Steve"]);

    drop(mailbox);
    assert_eq!(task.await.unwrap(), UnitExit::Clean);
}

#[tokio::test]
async fn unit_exits_abnormally_on_connection_end() {
    let connector = Arc::new(SimConnector::new());
    let (_mailbox, inbox) = mailbox();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_unit(
        unit_spec("Alice", false),
        connector.clone(),
        inbox,
        Reporter::new(UnitId(7), tx),
    ));
    next_event(&mut rx).await;

    connector.drop_connection("Alice", "kicked for spam");
    let exit = task.await.unwrap();
    assert_eq!(exit, UnitExit::ConnectionLost("kicked for spam".into()));
    assert!(exit.is_abnormal());
    assert_eq!(exit.code(), 1);
}

#[tokio::test]
async fn unit_connect_failure_is_reported() {
    let connector = Arc::new(SimConnector::new());
    connector.refuse("Alice");
    let (_mailbox, inbox) = mailbox();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let exit = run_unit(
        unit_spec("Alice", false),
        connector,
        inbox,
        Reporter::new(UnitId(7), tx),
    )
    .await;
    assert!(matches!(exit, UnitExit::ConnectFailed(_)));
    assert!(matches!(next_event(&mut rx).await, UnitEvent::Error { .. }));
}
