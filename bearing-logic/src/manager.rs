use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use log::{debug, error, info, warn};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    UtcDT,
    course_state::{CourseState, CourseUiState},
    location::{Coordinates, Location, LocationComponent, LocationService},
    settings::CourseSettings,
    streets::StreetResolver,
};

/// Notified whenever something a UI would show has changed
pub trait StateUpdateSender: Send + Sync {
    fn send_update(&self);
}

impl<S: StateUpdateSender + ?Sized> StateUpdateSender for Box<S> {
    fn send_update(&self) {
        (**self).send_update()
    }
}

/// Handles shared by everything one run of course updates spawns
#[derive(Clone)]
struct UpdateRun {
    cancel: CancellationToken,
    /// Street lookups in flight
    lookups: TaskTracker,
}

struct RunningUpdates {
    run: UpdateRun,
    handle: JoinHandle<()>,
}

/// Holds the last known course (heading, speed, coordinates and streets).
/// Fixes come from a [LocationService], street names from a [StreetResolver],
/// and changes are announced through a [StateUpdateSender].
pub struct LocationManager<L: LocationService, R: StreetResolver, S: StateUpdateSender> {
    state: RwLock<CourseState>,
    location: L,
    resolver: R,
    state_update_sender: S,
    /// Serializes start/stop, [Option::Some] while the update loop is alive
    running: Mutex<Option<RunningUpdates>>,
    clock: (UtcDT, Instant),
}

impl<L, R, S> LocationManager<L, R, S>
where
    L: LocationService + 'static,
    R: StreetResolver + 'static,
    S: StateUpdateSender + 'static,
{
    pub fn new(location: L, resolver: R, state_update_sender: S, settings: CourseSettings) -> Self {
        Self {
            state: RwLock::new(CourseState::new(settings)),
            location,
            resolver,
            state_update_sender,
            running: Mutex::new(None),
            clock: (Utc::now(), Instant::now()),
        }
    }

    pub async fn last_direction(&self) -> Option<LocationComponent> {
        self.state.read().await.direction()
    }

    pub async fn last_speed(&self) -> Option<LocationComponent> {
        self.state.read().await.speed()
    }

    pub async fn last_coordinates(&self) -> Option<Coordinates> {
        self.state.read().await.coordinates()
    }

    pub async fn is_monitoring_location_updates(&self) -> bool {
        self.state.read().await.is_monitoring()
    }

    pub async fn last_current_street(&self) -> Option<String> {
        self.state.read().await.current_street().map(str::to_string)
    }

    pub async fn last_near_street(&self) -> Option<String> {
        self.state.read().await.near_street().map(str::to_string)
    }

    pub async fn get_ui_state(&self) -> CourseUiState {
        self.state.read().await.as_ui_state()
    }

    pub async fn clone_settings(&self) -> CourseSettings {
        self.state.read().await.clone_settings()
    }

    /// Replace the settings, a running loop picks up a new interval after its next tick
    pub async fn update_settings(&self, settings: CourseSettings) {
        self.state.write().await.set_settings(settings);
    }

    /// Begin polling the location service. Does nothing if updates are already running.
    pub async fn start_course_updates(self: &Arc<Self>) {
        let mut running = self.running.lock().await;

        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                debug!("Course updates already running");
                return;
            }
            warn!("Course update loop died, restarting it");
        }

        self.state.write().await.start_monitoring();

        let run = UpdateRun {
            cancel: CancellationToken::new(),
            lookups: TaskTracker::new(),
        };
        let this = self.clone();
        let loop_run = run.clone();
        let handle = tokio::spawn(async move {
            this.main_loop(loop_run).await;
        });

        *running = Some(RunningUpdates { run, handle });
        drop(running);

        info!("Started course updates");
        self.state_update_sender.send_update();
    }

    /// Stop polling the location service. Once this returns the cached values
    /// won't change until [Self::start_course_updates] is called again.
    pub async fn stop_course_updates(&self) {
        let mut running = self.running.lock().await;

        let Some(RunningUpdates { run, handle }) = running.take() else {
            debug!("Course updates already stopped");
            return;
        };

        run.cancel.cancel();
        if let Err(why) = handle.await {
            error!("Course update loop failed: {why:?}");
        }

        run.lookups.close();
        run.lookups.wait().await;

        self.state.write().await.stop_monitoring();
        drop(running);

        info!("Stopped course updates");
        self.state_update_sender.send_update();
    }

    /// Run one update right now instead of waiting for the next interval.
    /// Does nothing unless updates are running.
    pub async fn poll_once(self: &Arc<Self>) {
        let run = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|current| current.run.clone());

        if let Some(run) = run {
            self.tick(&run).await;
        }
    }

    /// Wall-clock time derived from the monotonic clock, so paused time in
    /// tests and clock jumps in the wild both behave
    fn now(&self) -> UtcDT {
        let (wall, mono) = self.clock;
        wall + TimeDelta::from_std(mono.elapsed()).unwrap_or_default()
    }

    /// Poll the location service once and kick off a street lookup if one is due
    async fn tick(self: &Arc<Self>, run: &UpdateRun) {
        let mut state = self.state.write().await;

        // Stop has begun, leave everything as it is
        if run.cancel.is_cancelled() {
            return;
        }

        let Some(loc) = self.location.get_loc() else {
            debug!("No location available");
            return;
        };

        let now = self.now();
        let accepted = state.accept_fix(now, loc);

        let query = if state.should_geocode(now) {
            state.mark_geocode_attempt(now);
            state.coordinates().map(|coords| {
                let mut query = Location::new(coords.lat, coords.long);
                query.heading = state.direction();
                (coords, query)
            })
        } else {
            None
        };
        drop(state);

        if accepted {
            self.state_update_sender.send_update();
        }

        if let Some((coords, query)) = query {
            let this = self.clone();
            let run2 = run.clone();
            run.lookups.spawn(async move {
                this.lookup_streets(&run2.cancel, coords, query).await;
            });
        }
    }

    /// Resolve streets for `query` and store them, unless stopped first
    async fn lookup_streets(
        &self,
        cancel: &CancellationToken,
        coords: Coordinates,
        query: Location,
    ) {
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return;
            }
            res = self.resolver.resolve(&query) => res,
        };

        let mut state = self.state.write().await;
        if cancel.is_cancelled() {
            return;
        }
        state.finish_geocode();

        match res {
            Ok(streets) => {
                let changed = state.set_streets(coords, streets);
                drop(state);
                if changed {
                    debug!("Streets changed");
                    self.state_update_sender.send_update();
                }
            }
            Err(why) => {
                warn!("Failed to resolve streets: {why:?}");
            }
        }
    }

    async fn current_interval(&self) -> Duration {
        self.state.read().await.clone_settings().update_interval()
    }

    /// Main update loop, polls the location service every interval until cancelled.
    async fn main_loop(self: Arc<Self>, run: UpdateRun) {
        let mut period = self.current_interval().await;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = run.cancel.cancelled() => {
                    break;
                }

                _ = interval.tick() => {
                    self.tick(&run).await;

                    let wanted = self.current_interval().await;
                    if wanted != period {
                        debug!("Update interval changed to {wanted:?}");
                        period = wanted;
                        interval = tokio::time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
            }
        }

        debug!("Course update loop exited");
    }
}
