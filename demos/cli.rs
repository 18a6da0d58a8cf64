use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};

use window_eye::session::Error as SessionError;
use window_eye::settings::{CaptureArea, CursorCaptureSettings, DrawBorderSettings, Settings};
use window_eye::{CaptureSession, CaptureSlot, NativeBackend, NativeWindowSource, WindowHandle, list_windows};

#[derive(Parser)]
#[command(name = "Window Eye")]
#[command(version = "0.1.0")]
#[command(about = "Lists windows and pulls frames from one of them")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the handle and title of every capturable window
    List,
    /// Capture frames from a window until interrupted or the frame count is reached
    Capture {
        /// Window handle, decimal or 0x prefixed hex, as printed by `list`
        #[arg(long)]
        window: WindowHandle,

        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,

        /// Delay between two refreshes in milliseconds
        #[arg(long, default_value_t = 33)]
        interval_ms: u64,

        /// Part of the window to capture
        #[arg(long, value_enum, default_value_t = Area::Window)]
        area: Area,

        /// Cursor capture settings: always, never, default
        #[arg(long, value_enum, default_value_t = Toggle::Default)]
        cursor_capture: Toggle,

        /// Draw border settings: always, never, default
        #[arg(long, value_enum, default_value_t = Toggle::Default)]
        draw_border: Toggle,

        /// Consecutive failed refreshes tolerated before giving up
        #[arg(long, default_value_t = 5)]
        max_failures: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Area {
    Window,
    Client,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    Always,
    Never,
    Default,
}

fn list() {
    // A failed enumeration shows up as an empty list.
    let windows = list_windows(&NativeWindowSource::default()).unwrap_or_default();

    if windows.is_empty() {
        println!("No windows found");
    }
    for window in windows {
        println!("{window}");
    }
}

fn capture(
    window: WindowHandle,
    settings: Settings,
    frames: Option<u64>,
    interval: Duration,
    max_failures: u32,
    stop_flag: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = NativeBackend::new(settings);
    let mut session = CaptureSession::create(backend, &CaptureSlot::process_wide(), window)?;
    println!("Capturing {window}, {}x{}", session.width(), session.height());

    let start = Instant::now();
    let mut captured = 0u64;
    let mut failures = 0u32;

    while !stop_flag.load(Ordering::SeqCst) && frames.is_none_or(|frames| captured < frames) {
        match session.refresh() {
            Ok(()) => failures = 0,
            Err(e @ SessionError::FrameUpdate(_)) => {
                failures += 1;
                eprintln!("\n{e} ({failures}/{max_failures})");
                if failures >= max_failures {
                    session.close();
                    return Err(e.into());
                }
                thread::sleep(interval);
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        let frame = session.fetch_frame()?;
        captured += 1;

        let fps = captured as f64 / start.elapsed().as_secs_f64();
        print!(
            "\rFrame {captured} | {}x{} | first pixel {:?} | FPS: {fps:.2}",
            frame.width(),
            frame.height(),
            frame.pixel(0, 0).unwrap_or_default(),
        );
        io::stdout().flush()?;

        thread::sleep(interval);
    }

    session.close();
    println!("\nCapture stopped after {captured} frames");

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::List => list(),
        Command::Capture { window, frames, interval_ms, area, cursor_capture, draw_border, max_failures } => {
            let area = match area {
                Area::Window => CaptureArea::Window,
                Area::Client => CaptureArea::Client,
            };
            let cursor_capture = match cursor_capture {
                Toggle::Always => CursorCaptureSettings::WithCursor,
                Toggle::Never => CursorCaptureSettings::WithoutCursor,
                Toggle::Default => CursorCaptureSettings::Default,
            };
            let draw_border = match draw_border {
                Toggle::Always => DrawBorderSettings::WithBorder,
                Toggle::Never => DrawBorderSettings::WithoutBorder,
                Toggle::Default => DrawBorderSettings::Default,
            };

            let stop_flag = Arc::new(AtomicBool::new(false));

            // Set up Ctrl+C handler
            {
                let stop_flag = stop_flag.clone();
                ctrlc::set_handler(move || {
                    stop_flag.store(true, Ordering::SeqCst);
                })
                .expect("Error setting Ctrl-C handler");
            }

            let settings = Settings::new(area, cursor_capture, draw_border);
            if let Err(e) =
                capture(window, settings, frames, Duration::from_millis(interval_ms), max_failures, &stop_flag)
            {
                eprintln!("\nCapture failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
