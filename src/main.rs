use std::path::PathBuf;
use std::sync::Arc;

use media_stream_client::audio::AudioBackend;
use media_stream_client::operator::{ConsoleSurface, SoundDeviceGate};
use media_stream_client::{Config, SessionController, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

fn print_status(controller: &SessionController) {
    match controller.state() {
        SessionState::Streaming => println!("Streaming Audio..."),
        SessionState::Idle => println!("Press Start to Stream (type 'start')"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 加载配置
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    log::info!(
        "Media stream client: url={}, capture={}, playback={}, gain={}",
        config.network.url,
        config.audio.capture_device,
        config.audio.playback_device,
        config.audio.gain
    );

    let backend: Arc<dyn AudioBackend> = Arc::new(config.alsa_backend());
    let (mut controller, mut rx_event) = SessionController::new(
        config,
        backend,
        Arc::new(SoundDeviceGate::new()),
        Arc::new(ConsoleSurface),
    );

    // Failures are already on the error surface; stay up so the operator can retry.
    let _ = controller.start().await;
    print_status(&controller);
    println!("Commands: start | stop | status | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_event.recv() => {
                controller.handle_event(event).await;
            }

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(cmd)) => match cmd.trim() {
                        "start" => {
                            let _ = controller.start().await;
                            print_status(&controller);
                        }
                        "stop" => {
                            controller.stop().await;
                            print_status(&controller);
                        }
                        "status" => {
                            print_status(&controller);
                            if let Some(state) = controller.connection_state() {
                                println!("Connection: {:?}", state);
                            }
                        }
                        "quit" | "exit" => break,
                        "" => {}
                        other => println!("Unknown command: {}", other),
                    },
                    // stdin closed (e.g. running under a service manager); keep streaming.
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        log::warn!("stdin error: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    controller.stop().await;
    Ok(())
}
