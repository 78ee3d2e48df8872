//! `simulation_lifecycle` 集成测试：从 crate 公开 API 视角验证模拟的启动、停止与运维入口。
//!
//! # 测试目标（Why）
//! - 三阶段启动后每个工作者都拿到首份配额，池与份额表保持一致；
//! - 重复启动、停止后再操作等误用路径返回明确的错误而不是 panic；
//! - 运维区间命令越界时被夹到合法范围，空区间为无操作。
//!
//! # 结构安排（How）
//! - 多数用例把 `ready_per_sec` 设为 0，避免后台线程在断言期间改变配额；
//! - 需要观察真实推进的用例使用只由测试推进的虚拟时钟，工作者线程的 sleep 不改变虚拟时间。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use capuch_core::{
    Clock, ConfigError, MockClock, Simulation, SimulationConfig, SimulationError, SimulationTelemetry,
};

/// 三个工作者平分 60 个资源的静止配置。
fn quiet_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.worker_count = 3;
    config.pool.total_rsc = 60;
    config.pool.reserve = 0;
    config.worker.ready_per_sec = 0;
    config.worker.tick_ns = 1_000_000;
    config
}

fn telemetry(sim: &Simulation) -> SimulationTelemetry {
    sim.telemetry().expect("模拟应处于运行状态")
}

#[test]
fn start_stop_and_restart() {
    let mut sim = Simulation::new(quiet_config());
    assert!(!sim.is_running());
    assert!(sim.telemetry().is_none());

    sim.start().expect("首次启动");
    assert!(sim.is_running());
    assert_eq!(sim.worker_count(), 3);
    assert!(matches!(sim.start(), Err(SimulationError::AlreadyRunning)));

    sim.stop();
    assert!(!sim.is_running());
    assert_eq!(sim.worker_count(), 0);
    sim.stop();

    sim.start().expect("停止后可再次启动");
    assert_eq!(telemetry(&sim).workers.len(), 3);
    sim.stop();
}

/// 启动后每个工作者 greed 为下限，池被均分，`total_pressure` 等于三份压力之和。
#[test]
fn start_distributes_initial_quotas() {
    let mut sim = Simulation::new(quiet_config());
    sim.start().expect("启动");

    let snapshot = telemetry(&sim);
    assert_eq!(snapshot.pool.capacity, 60);
    assert_eq!(snapshot.pool.total_pressure, 3 * 20);
    assert_eq!(snapshot.pool.free, 0);
    for worker in &snapshot.workers {
        assert_eq!(worker.greed, 1);
        assert_eq!(worker.priority, 10);
        assert_eq!(worker.pressure, 20);
        assert_eq!(worker.quota, 20);
    }
}

#[test]
fn invalid_config_is_rejected_at_start() {
    let mut config = quiet_config();
    config.pool.min_bufs = 30;
    let mut sim = Simulation::new(config);

    assert!(matches!(
        sim.start(),
        Err(SimulationError::Config(ConfigError::Inconsistent { .. }))
    ));
    assert!(!sim.is_running());
}

#[test]
fn operator_commands_require_a_running_simulation() {
    let sim = Simulation::new(quiet_config());
    assert!(matches!(
        sim.set_priority(0, 2, 5),
        Err(SimulationError::NotRunning)
    ));
    assert!(matches!(
        sim.set_ready_per_sec(0, 2, 5),
        Err(SimulationError::NotRunning)
    ));
    assert!(matches!(
        sim.force_disk_flush(),
        Err(SimulationError::NotRunning)
    ));
}

/// 优先级修改经由池锁修正 `total_pressure`，配额随之重新划分。
#[test]
fn priority_ranges_are_clamped() {
    let mut sim = Simulation::new(quiet_config());
    sim.start().expect("启动");

    assert_eq!(sim.set_priority(-3, 0, 30).expect("设置优先级"), 1);
    let snapshot = telemetry(&sim);
    assert_eq!(snapshot.pool.total_pressure, 60 + 20 + 20);
    assert_eq!(snapshot.workers[0].priority, 30);
    assert_eq!(snapshot.workers[0].quota, 36);
    assert_eq!(snapshot.workers[1].quota, 12);
    assert_eq!(snapshot.workers[2].quota, 12);

    assert_eq!(sim.set_priority(5, 9, 30).expect("空区间"), 0);
    assert_eq!(sim.set_priority(2, 1, 30).expect("反向区间"), 0);
    assert!(matches!(
        sim.set_priority(0, 2, 0),
        Err(SimulationError::Config(ConfigError::OutOfRange { .. }))
    ));
    assert_eq!(telemetry(&sim).pool.total_pressure, 100);
}

#[test]
fn ready_rate_ranges_are_clamped() {
    let mut sim = Simulation::new(quiet_config());
    sim.start().expect("启动");

    assert_eq!(sim.set_ready_per_sec(1, 100, 7).expect("设置速率"), 2);
    let rates: Vec<u32> = telemetry(&sim)
        .workers
        .iter()
        .map(|worker| worker.ready_per_sec)
        .collect();
    assert_eq!(rates, vec![0, 7, 7]);
}

#[test]
fn live_config_updates_are_validated() {
    let sim = Simulation::new(quiet_config());
    sim.set_config("pool_conf.flush_size", 4).expect("合法修改");
    assert_eq!(sim.config().pool.flush_size, 4);

    assert!(matches!(
        sim.set_config("pool_conf.bogus", 1),
        Err(ConfigError::UnknownKey { .. })
    ));
    assert!(matches!(
        sim.set_config("pool_conf.min_greed", 21),
        Err(ConfigError::Inconsistent { .. })
    ));
    assert_eq!(sim.config().pool.min_greed, 1);
}

/// 只由测试推进的虚拟时钟：工作者的 sleep 只让出真实时间，不推进虚拟时间；
/// 同时记下已进入轮询循环的线程，测试据此确认所有工作者都已就位。
struct SteppedClock {
    inner: MockClock,
    sleepers: Mutex<HashSet<ThreadId>>,
}

impl SteppedClock {
    fn new(inner: MockClock) -> Self {
        Self {
            inner,
            sleepers: Mutex::new(HashSet::new()),
        }
    }

    fn sleepers(&self) -> usize {
        self.sleepers.lock().map_or(0, |set| set.len())
    }
}

impl Clock for SteppedClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn sleep(&self, _duration: Duration) {
        if let Ok(mut set) = self.sleepers.lock() {
            set.insert(thread::current().id());
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn wait_until(sim: &Simulation, what: &str, done: impl Fn(&SimulationTelemetry) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(&telemetry(sim)) {
        assert!(Instant::now() < deadline, "{what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// 工作者自行填充、攒批并刷盘；强制刷盘后磁盘积压清零，在途批次随即被回收。
#[test]
fn workers_make_progress_and_disk_flush_clears_backlog() {
    let mut config = quiet_config();
    config.worker.ready_per_sec = 4;
    config.pool.flush_size = 4;
    config.pool.flush_timeout_ns = 3_600_000_000_000;
    config.disk.consume_per_second = 1;
    let clock = MockClock::new();
    let stepped = Arc::new(SteppedClock::new(clock.clone()));
    let mut sim = Simulation::with_clock(config, Arc::clone(&stepped) as Arc<dyn Clock>);
    sim.start().expect("启动");

    let deadline = Instant::now() + Duration::from_secs(10);
    while stepped.sleepers() < 3 {
        assert!(Instant::now() < deadline, "工作者未能进入轮询循环");
        thread::sleep(Duration::from_millis(2));
    }

    // 两秒内每个工作者完成 8 次填充：首个只装载 active，其余 7 个组成一个批次。
    clock.advance(Duration::from_secs(2));
    wait_until(&sim, "工作者未能在期限内提交批次", |snapshot| {
        snapshot
            .workers
            .iter()
            .all(|worker| worker.batch_id == 1 && worker.flushing)
    });
    // 三个批次共 21 个资源，每秒只消化 1 个。
    assert_eq!(telemetry(&sim).disk.backlog, Duration::from_secs(21));

    sim.force_disk_flush().expect("强制刷盘");
    assert_eq!(telemetry(&sim).disk.backlog, Duration::ZERO);

    wait_until(&sim, "强制刷盘后在途批次应被回收", |snapshot| {
        snapshot
            .workers
            .iter()
            .all(|worker| !worker.flushing && worker.ready == 0)
    });
    assert_eq!(telemetry(&sim).disk.backlog, Duration::ZERO);
    sim.stop();
}

#[test]
fn telemetry_serializes_to_json() {
    let mut sim = Simulation::new(quiet_config());
    sim.start().expect("启动");

    let json = serde_json::to_value(telemetry(&sim)).expect("序列化遥测");
    assert_eq!(json["pool"]["capacity"], 60);
    assert_eq!(json["workers"].as_array().map(Vec::len), Some(3));
    assert!(json["workers"][0].get("greed").is_some());
}

/// `Drop` 负责停止后台线程。
#[test]
fn dropping_a_running_simulation_joins_workers() {
    let mut sim = Simulation::new(quiet_config());
    sim.start().expect("启动");
    drop(sim);
}
