use std::{path::PathBuf, sync::Arc};

use bearing_geocode::NominatimResolver;
use bearing_logic::{
    CourseSettings, SharedLocationManager, StateUpdateSender, StreetMap, StreetResolver,
    init_shared_manager, shared_manager,
};
use bearing_test_shared::*;
use clap::Parser;
use futures::StreamExt;
use interprocess::local_socket::{ListenerOptions, tokio::prelude::*};
use log::{error, info, warn};
use tokio::{io::AsyncWriteExt, sync::mpsc};

#[derive(Parser)]
/// Run a location manager against a recorded track, controlled over a local socket
struct Cli {
    /// Name of the local socket to listen on
    socket: String,
    /// JSON array of locations to replay
    track: PathBuf,
    /// JSON street map used to name streets offline
    #[arg(long, conflicts_with = "nominatim")]
    streets: Option<PathBuf>,
    /// Name streets with a Nominatim server, optionally at the given URL
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    nominatim: Option<String>,
    /// JSON file with course settings
    #[arg(long)]
    settings: Option<PathBuf>,
}

struct UpdateSender(mpsc::Sender<()>);

impl StateUpdateSender for UpdateSender {
    fn send_update(&self) {
        // A pending notification already covers this one
        self.0.try_send(()).ok();
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<CourseSettings> {
    let Some(path) = path else {
        return Ok(CourseSettings::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings {}", path.display()))?;
    serde_json::from_str(&raw).context("Failed to parse settings")
}

fn make_resolver(cli: &Cli) -> Result<Box<dyn StreetResolver>> {
    if let Some(url) = cli.nominatim.as_deref() {
        let mut resolver = NominatimResolver::new()?;
        if !url.is_empty() {
            resolver = resolver.with_base_url(url);
        }
        Ok(Box::new(resolver))
    } else if let Some(path) = cli.streets.as_ref() {
        Ok(Box::new(StreetMap::load(path)?))
    } else {
        warn!("No street source given, street names will stay empty");
        Ok(Box::new(StreetMap::default()))
    }
}

async fn process_req(manager: &Arc<SharedLocationManager>, req: TestingRequest) -> TestingResponse {
    match req {
        TestingRequest::StartCourseUpdates => {
            manager.start_course_updates().await;
            TestingResponse::Complete
        }
        TestingRequest::StopCourseUpdates => {
            manager.stop_course_updates().await;
            TestingResponse::Complete
        }
        TestingRequest::GetState => manager.get_ui_state().await.into(),
        TestingRequest::NextTick => {
            if manager.is_monitoring_location_updates().await {
                manager.poll_once().await;
                TestingResponse::Complete
            } else {
                TestingResponse::Error("Course updates are stopped".to_string())
            }
        }
        TestingRequest::UpdateSettings(settings) => {
            manager.update_settings(settings).await;
            TestingResponse::Complete
        }
    }
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();

    let socket_name = get_socket_name(cli.socket.clone())?;
    let location = ReplayLocation::load(&cli.track)?;
    let settings = load_settings(cli.settings.as_ref())?;
    let resolver = make_resolver(&cli)?;

    info!("Loaded track with {} fixes", location.len());

    let (update_tx, mut update_rx) = mpsc::channel(2);
    init_shared_manager(location, resolver, UpdateSender(update_tx), settings)?;
    let manager = shared_manager().context("Shared manager missing after install")?;

    let opts = ListenerOptions::new().name(socket_name);
    let listener = opts.create_tokio().context("Failed to bind to socket")?;

    info!("Testing Daemon Ready");

    'server: loop {
        let res = tokio::select! {
            res = listener.accept() => {
                res
            },
            Ok(_) = tokio::signal::ctrl_c() => {
                break 'server;
            }
        };

        let stream = match res {
            Ok(stream) => stream,
            Err(why) => {
                error!("Error from connection: {why:?}");
                continue;
            }
        };

        let mut lines = line_reader(&stream);
        let mut send = &stream;

        loop {
            let resp = tokio::select! {
                Ok(_) = tokio::signal::ctrl_c() => {
                    break 'server;
                }
                res = lines.next() => {
                    match res {
                        None => {
                            break;
                        }
                        Some(Ok(line)) => match decode_line::<TestingRequest>(&line) {
                            Ok(req) => process_req(&manager, req).await,
                            Err(why) => why.into(),
                        },
                        Some(Err(why)) => {
                            error!("Read Error: {why:?}");
                            break;
                        }
                    }
                }
                Some(_) = update_rx.recv() => {
                    TestingResponse::StateChanged
                }
            };

            let encoded = encode_line(&resp)?;
            if let Err(why) = send.write_all(&encoded).await {
                error!("Write Error: {why:?}");
                break;
            }
        }

        info!("Driver disconnected");
    }

    manager.stop_course_updates().await;

    Ok(())
}
