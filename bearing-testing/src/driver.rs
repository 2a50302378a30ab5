use std::path::PathBuf;

use bearing_logic::CourseSettings;
use bearing_test_shared::*;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use interprocess::local_socket::{tokio::Stream, traits::tokio::Stream as _};
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
struct Cli {
    /// Name of the local socket the test daemon is listening on
    socket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start course updates
    Start,
    /// Stop course updates
    Stop,
    /// Print the current course
    State,
    /// Poll the location right away
    Tick,
    /// Replace the course settings with the contents of a JSON file
    Settings {
        /// Path to the settings file
        file: PathBuf,
    },
    /// Print the course every time it changes, until interrupted
    Watch,
}

impl Commands {
    fn as_request(&self) -> Result<Option<TestingRequest>> {
        Ok(Some(match self {
            Commands::Start => TestingRequest::StartCourseUpdates,
            Commands::Stop => TestingRequest::StopCourseUpdates,
            Commands::State => TestingRequest::GetState,
            Commands::Tick => TestingRequest::NextTick,
            Commands::Settings { file } => {
                let raw = std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let settings = serde_json::from_str::<CourseSettings>(&raw)
                    .context("Failed to parse settings")?;
                TestingRequest::UpdateSettings(settings)
            }
            Commands::Watch => return Ok(None),
        }))
    }
}

fn print_resp(resp: &TestingResponse) -> Result {
    let pretty = serde_json::to_string_pretty(resp).context("Failed to encode")?;
    println!("{pretty}");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();

    let socket_name = get_socket_name(cli.socket.clone()).context("Failed to get socket name")?;

    let stream = Stream::connect(socket_name)
        .await
        .context("Failed to connect to socket")?;

    let mut lines = line_reader(&stream);
    let mut send = &stream;

    let request = cli.command.as_request()?;
    let watching = request.is_none();

    if let Some(req) = request {
        send.write_all(&encode_line(&req)?)
            .await
            .context("Failed to send request")?;
    }

    loop {
        let line = tokio::select! {
            Ok(_) = tokio::signal::ctrl_c() => {
                break;
            }
            res = lines.next() => match res {
                Some(line) => line.context("Failed to read response")?,
                None => bail!("Daemon closed the connection"),
            },
        };

        let resp = decode_line::<TestingResponse>(&line)?;

        match (&resp, watching) {
            (TestingResponse::StateChanged, true) => {
                send.write_all(&encode_line(&TestingRequest::GetState)?)
                    .await
                    .context("Failed to send request")?;
            }
            (TestingResponse::StateChanged, false) => {}
            (TestingResponse::Error(why), _) => bail!("Daemon error: {why}"),
            (_, true) => print_resp(&resp)?,
            (_, false) => {
                print_resp(&resp)?;
                break;
            }
        }
    }

    Ok(())
}
