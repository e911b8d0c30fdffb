use crate::settings::{Settings, SettingsField};
use anyhow::Result;
use beespeed::speedtest::TestPhase;
use beespeed::{
    IntermediateSample, LatencyResult, PhaseResult, ServerEndpoints, Speedtest,
    TestConfiguration, TestResult, WorkerKind,
};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use log::warn;
use std::time::Duration;
use tokio::sync::mpsc;

const MAX_CHART_SAMPLES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

/// Live view of one transfer phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseView {
    /// Elapsed share of the phase duration, 0.0 to 1.0.
    pub progress: f64,
    /// Running throughput in Mbps, one entry per progress sample.
    pub samples: Vec<f64>,
    pub result: Option<PhaseResult>,
}

impl PhaseView {
    fn record(&mut self, sample: IntermediateSample, duration: Duration) {
        if !duration.is_zero() {
            self.progress = (sample.elapsed.as_secs_f64() / duration.as_secs_f64()).min(1.0);
        }
        push_bounded(&mut self.samples, sample.mbps());
    }

    fn finish(&mut self, result: PhaseResult) {
        self.progress = 1.0;
        self.result = Some(result);
    }

    pub fn current_mbps(&self) -> f64 {
        match self.result {
            Some(result) => result.mbps(),
            None => self.samples.last().copied().unwrap_or(0.0),
        }
    }
}

fn push_bounded(samples: &mut Vec<f64>, value: f64) {
    samples.push(value);
    if samples.len() > MAX_CHART_SAMPLES {
        samples.remove(0);
    }
}

pub struct App {
    pub phase: TestPhase,
    pub result: TestResult,
    pub should_quit: bool,
    pub server_label: String,
    pub isp_label: String,
    pub error: Option<String>,

    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,

    pub settings: Settings,
    pub selected_setting: SettingsField,

    pub download: PhaseView,
    pub upload: PhaseView,
    pub ping_samples: Vec<f64>,

    cancel_tx: Option<mpsc::Sender<()>>,
}

impl App {
    pub fn new(server_label: String, isp_label: String, settings: Settings) -> Self {
        Self {
            phase: TestPhase::Idle,
            result: TestResult::default(),
            should_quit: false,
            server_label,
            isp_label,
            error: None,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            settings,
            selected_setting: SettingsField::PingCount,
            download: PhaseView::default(),
            upload: PhaseView::default(),
            ping_samples: Vec::new(),
            cancel_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.phase, TestPhase::Idle | TestPhase::Complete)
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Settings => self.handle_settings_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') if !self.is_running() => {
                self.view = AppView::Settings;
                None
            }
            KeyCode::Enter if self.expanded => {
                self.expanded = false;
                None
            }
            KeyCode::Enter if !self.is_running() => Some(AppAction::StartTest),
            KeyCode::Enter => {
                self.expanded = true;
                None
            }
            KeyCode::Esc if self.expanded => {
                self.expanded = false;
                None
            }
            KeyCode::Esc if self.is_running() => Some(AppAction::CancelTest),
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') if !self.expanded => {
                self.selected_panel = self.selected_panel.next();
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') if !self.expanded => {
                self.selected_panel = self.selected_panel.prev();
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => self.view = AppView::Main,
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_setting = self.selected_setting.prev();
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next();
            }
            KeyCode::Left | KeyCode::Char('h') => self.adjust_setting(false),
            KeyCode::Right | KeyCode::Char('l') => self.adjust_setting(true),
            _ => {}
        }
        None
    }

    fn adjust_setting(&mut self, up: bool) {
        let settings = &mut self.settings;
        match self.selected_setting {
            SettingsField::PingCount => {
                settings.ping_count = step(settings.ping_count, 5, 5, 200, up);
            }
            SettingsField::Duration => {
                settings.duration_secs = step(settings.duration_secs, 1, 1, 60, up);
            }
            SettingsField::Concurrency => {
                settings.concurrency = step(settings.concurrency, 1, 1, 32, up);
            }
        }
    }

    pub fn reset_for_new_test(&mut self) {
        self.phase = TestPhase::Idle;
        self.result = TestResult::default();
        self.error = None;
        self.download = PhaseView::default();
        self.upload = PhaseView::default();
        self.ping_samples.clear();
        self.expanded = false;
    }

    pub fn apply(&mut self, update: TestUpdate) {
        match update {
            TestUpdate::PingSample(ms) => push_bounded(&mut self.ping_samples, ms),
            TestUpdate::PingComplete(latency) => {
                self.result.ping_millis = latency.mean_latency_ms;
                self.result.jitter_millis = latency.jitter_ms;
                self.phase = TestPhase::Download;
            }
            TestUpdate::Progress(kind, sample) => {
                let duration = self.settings.duration();
                self.phase_view(kind).record(sample, duration);
            }
            TestUpdate::PhaseComplete(kind, result) => {
                self.phase_view(kind).finish(result);
                match kind {
                    WorkerKind::Download => {
                        self.result.download = Some(result);
                        self.phase = TestPhase::Upload;
                    }
                    WorkerKind::Upload => {
                        self.result.upload = Some(result);
                        self.complete_test();
                    }
                }
            }
            TestUpdate::Failed(message) => {
                self.error = Some(message);
                self.complete_test();
            }
        }
    }

    pub fn phase_view(&mut self, kind: WorkerKind) -> &mut PhaseView {
        match kind {
            WorkerKind::Download => &mut self.download,
            WorkerKind::Upload => &mut self.upload,
        }
    }

    pub fn complete_test(&mut self) {
        self.phase = TestPhase::Complete;
        self.cancel_tx = None;
    }

    pub fn set_cancel_tx(&mut self, tx: mpsc::Sender<()>) {
        self.cancel_tx = Some(tx);
    }

    pub fn cancel_test(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
        self.phase = TestPhase::Idle;
    }
}

fn step<T>(value: T, by: T, min: T, max: T, up: bool) -> T
where
    T: Copy + Ord + std::ops::Add<Output = T> + std::ops::Sub<Output = T>,
{
    if up {
        (value + by).min(max)
    } else if value > min + by {
        value - by
    } else {
        min
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
}

#[derive(Debug, Clone)]
pub enum TestUpdate {
    PingSample(f64),
    PingComplete(LatencyResult),
    Progress(WorkerKind, IntermediateSample),
    PhaseComplete(WorkerKind, PhaseResult),
    Failed(String),
}

/// Runs latency, download and upload in order until done or cancelled.
///
/// Samples are forwarded with `try_send`: a full channel drops a chart point
/// rather than stalling the measurement.
pub async fn run_speed_test(
    update_tx: mpsc::Sender<TestUpdate>,
    mut cancel_rx: mpsc::Receiver<()>,
    endpoints: ServerEndpoints,
    config: TestConfiguration,
) -> Result<()> {
    let mut speedtest = match Speedtest::new(endpoints, config) {
        Ok(speedtest) => speedtest,
        Err(err) => {
            let _ = update_tx.send(TestUpdate::Failed(err.to_string())).await;
            return Err(err.into());
        }
    };

    tokio::select! {
        biased;
        _ = cancel_rx.recv() => {}
        outcome = measure(&mut speedtest, &update_tx) => {
            if let Err(err) = outcome {
                warn!("Speed test failed: {}", err);
                let _ = update_tx.send(TestUpdate::Failed(err.to_string())).await;
            }
        }
    }
    Ok(())
}

async fn measure(
    speedtest: &mut Speedtest,
    update_tx: &mpsc::Sender<TestUpdate>,
) -> beespeed::Result<()> {
    let tx = update_tx.clone();
    let latency = speedtest
        .test_ping_with(move |ms| {
            let _ = tx.try_send(TestUpdate::PingSample(ms));
        })
        .await?;
    let _ = update_tx.send(TestUpdate::PingComplete(latency)).await;

    for kind in [WorkerKind::Download, WorkerKind::Upload] {
        let tx = update_tx.clone();
        let result = speedtest
            .test_speed(kind, move |sample| {
                let _ = tx.try_send(TestUpdate::Progress(kind, sample));
            })
            .await?;
        let _ = update_tx.send(TestUpdate::PhaseComplete(kind, result)).await;
    }
    Ok(())
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyModifiers};

    fn app() -> App {
        let settings = Settings {
            ping_count: 10,
            duration_secs: 4,
            concurrency: 5,
        };
        App::new("server".into(), "isp".into(), settings)
    }

    fn press(app: &mut App, code: KeyCode) -> Option<AppAction> {
        app.handle_key_event(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn enter_starts_only_when_idle() {
        let mut app = app();
        assert!(matches!(press(&mut app, KeyCode::Enter), Some(AppAction::StartTest)));

        app.phase = TestPhase::Download;
        assert!(press(&mut app, KeyCode::Enter).is_none());
        assert!(app.expanded);
        assert!(press(&mut app, KeyCode::Esc).is_none());
        assert!(!app.expanded);
        assert!(matches!(press(&mut app, KeyCode::Esc), Some(AppAction::CancelTest)));
    }

    #[test]
    fn settings_are_clamped() {
        let mut app = app();
        press(&mut app, KeyCode::Char('s'));
        assert_eq!(app.view, AppView::Settings);

        press(&mut app, KeyCode::Down);
        for _ in 0..10 {
            press(&mut app, KeyCode::Left);
        }
        assert_eq!(app.settings.duration_secs, 1);

        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Right);
        assert_eq!(app.settings.concurrency, 6);

        press(&mut app, KeyCode::Esc);
        assert_eq!(app.view, AppView::Main);
    }

    #[test]
    fn updates_drive_the_phases() {
        let mut app = app();
        app.phase = TestPhase::Ping;

        app.apply(TestUpdate::PingSample(12.0));
        app.apply(TestUpdate::PingComplete(LatencyResult {
            mean_latency_ms: 12.0,
            jitter_ms: 0.5,
            samples: 1,
        }));
        assert_eq!(app.phase, TestPhase::Download);
        assert_eq!(app.result.jitter_millis, 0.5);

        app.apply(TestUpdate::Progress(
            WorkerKind::Download,
            IntermediateSample {
                elapsed: Duration::from_secs(1),
                bytes: 1_250_000,
            },
        ));
        assert_eq!(app.download.progress, 0.25);
        assert_eq!(app.download.current_mbps(), 10.0);

        let done = PhaseResult {
            bytes_total: 5_000_000,
            elapsed: Duration::from_secs(4),
        };
        app.apply(TestUpdate::PhaseComplete(WorkerKind::Download, done));
        assert_eq!(app.phase, TestPhase::Upload);
        assert_eq!(app.result.download, Some(done));

        app.apply(TestUpdate::Failed("connection refused".into()));
        assert_eq!(app.phase, TestPhase::Complete);
        assert_eq!(app.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn chart_history_is_bounded() {
        let mut samples = Vec::new();
        for i in 0..(MAX_CHART_SAMPLES + 10) {
            push_bounded(&mut samples, i as f64);
        }
        assert_eq!(samples.len(), MAX_CHART_SAMPLES);
        assert_eq!(samples[0], 10.0);
    }
}
