//! Wiring: source thread → receiver → dispatch → outputs
//!
//! One worker thread drives the selected sample or message source and
//! feeds the main loop over a bounded channel; backpressure from the
//! channel paces file input naturally. The main loop demodulates
//! sample chunks (message sources skip that step) and fans completed
//! batches out to the registered outputs. SIGINT/SIGTERM raise the
//! halt flag; the source notices, the thread is joined, and the
//! process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{error, info};

use uat978::ReceiverBuilder;

use crate::cli::{Args, CliError, Input};
use crate::output::{add_stdout_client, metadata_header, spawn_listener, Dispatch, OutputFormat};
use crate::source::{run_file_source, run_stdin_source, SourceEvent};
use crate::stratux::run_stratux_source;

// source-to-main-loop queue depth
const SOURCE_QUEUE_DEPTH: usize = 16;

pub fn run(args: &Args) -> Result<i32, CliError> {
    let input = args.input()?;

    // outputs
    let dispatch = Arc::new(Dispatch::new());
    let header = metadata_header();

    for address in &args.raw_port {
        spawn_listener(
            address,
            OutputFormat::Raw,
            Some(header.clone()),
            dispatch.clone(),
        )?;
    }
    for address in &args.raw_legacy_port {
        spawn_listener(address, OutputFormat::Raw, None, dispatch.clone())?;
    }
    for address in &args.json_port {
        spawn_listener(address, OutputFormat::Json, None, dispatch.clone())?;
    }
    if args.raw_stdout {
        add_stdout_client(&dispatch, OutputFormat::Raw);
    }
    if args.json_stdout {
        add_stdout_client(&dispatch, OutputFormat::Json);
    }

    // shutdown flag, raised by SIGINT/SIGTERM
    let halt = Arc::new(AtomicBool::new(false));
    {
        let halt = halt.clone();
        ctrlc::set_handler(move || halt.store(true, Ordering::Relaxed))
            .context("could not install signal handler")?;
    }

    // source thread
    let (source_tx, source_rx) = bounded::<SourceEvent>(SOURCE_QUEUE_DEPTH);
    let mut receiver = match &input {
        Input::Stdin { format } | Input::File { format, .. } => Some(
            ReceiverBuilder::new(*format)
                .with_slicer(args.slicer())
                .build(),
        ),
        #[cfg(feature = "sdr")]
        Input::Sdr(_) => Some(
            ReceiverBuilder::new(crate::sdr::sdr_sample_format())
                .with_slicer(args.slicer())
                .build(),
        ),
        #[cfg(not(feature = "sdr"))]
        Input::Sdr(_) => {
            return Err(CliError::config(anyhow::anyhow!(
                "this build has no SDR support; rebuild with the \"sdr\" feature"
            )))
        }
        Input::Stratux { .. } => None,
    };

    let source_thread = {
        let halt = halt.clone();
        std::thread::spawn(move || match input {
            Input::Stdin { format } => run_stdin_source(format, &source_tx, &halt),
            Input::File {
                path,
                format,
                throttle,
            } => run_file_source(&path, format, throttle, &source_tx, &halt),
            #[cfg(feature = "sdr")]
            Input::Sdr(options) => crate::sdr::run_sdr_source(&options, &source_tx, &halt),
            #[cfg(not(feature = "sdr"))]
            Input::Sdr(_) => unreachable!("rejected during configuration"),
            Input::Stratux { path } => run_stratux_source(&path, &source_tx, &halt),
        })
    };

    // main loop
    let mut exit_code = 0;
    loop {
        if halt.load(Ordering::Relaxed) {
            info!("caught signal, exiting");
            exit_code = 1;
            break;
        }

        match source_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(SourceEvent::Samples { timestamp, bytes }) => {
                let receiver = receiver
                    .as_mut()
                    .expect("sample sources run with a receiver");
                let messages = receiver.handle_samples(timestamp, &bytes);
                if !messages.is_empty() {
                    dispatch.dispatch(&Arc::new(messages));
                }
            }
            Ok(SourceEvent::Messages(messages)) => {
                dispatch.dispatch(&Arc::new(messages));
            }
            Ok(SourceEvent::Eof) => {
                info!("source reports end of input, exiting");
                break;
            }
            Ok(SourceEvent::Error(e)) => {
                error!("source error: {e:#}");
                exit_code = 1;
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    halt.store(true, Ordering::Relaxed);
    drop(source_rx);
    let _ = source_thread.join();

    Ok(exit_code)
}
