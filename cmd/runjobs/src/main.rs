//! runjobs - run commands in parallel through mkjobs
//!
//! Usage: runjobs [-j N] [--shell SH] [--env] 'cmd args...' ['cmd args...' ...]
//!
//! Each command argument is split like a command line and submitted as
//! one job. Results are printed as they complete; the exit status is the
//! number of failed jobs (capped at 255).

use mkjobs::{lifecycle, split_command_line, OwnerRef};
use std::process::ExitCode;
use std::time::Instant;

struct Options {
    job_slots: u32,
    shell: String,
    own_env: bool,
    commands: Vec<String>,
}

fn usage() -> ExitCode {
    eprintln!("usage: runjobs [-j N] [--shell SH] [--env] 'cmd args...' ...");
    ExitCode::from(2)
}

fn parse_args() -> Result<Options, String> {
    let mut opts = Options {
        job_slots: std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        shell: "/bin/sh".to_string(),
        own_env: false,
        commands: Vec::new(),
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-j" => {
                let value = args.next().ok_or("-j needs a value")?;
                opts.job_slots = value.parse().map_err(|_| format!("bad job count: {}", value))?;
            }
            "--shell" => opts.shell = args.next().ok_or("--shell needs a value")?,
            "--env" => opts.own_env = true,
            _ => opts.commands.push(arg),
        }
    }
    if opts.commands.is_empty() {
        return Err("no commands given".to_string());
    }
    Ok(opts)
}

fn main() -> ExitCode {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("runjobs: {}", msg);
            return usage();
        }
    };

    if let Err(e) = lifecycle::init(opts.job_slots) {
        eprintln!("runjobs: {}", e);
        return ExitCode::FAILURE;
    }

    // Exercise the explicit-environment path: a snapshot of ours
    let env: Option<Vec<String>> = opts
        .own_env
        .then(|| std::env::vars().map(|(k, v)| format!("{}={}", k, v)).collect());

    let start = Instant::now();
    for (i, command) in opts.commands.iter().enumerate() {
        let argv = split_command_line(command);
        if let Err(e) = lifecycle::submit_process(&argv, env.as_deref(), &opts.shell, OwnerRef(i as u64)) {
            eprintln!("runjobs: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let mut failed = 0u32;
    loop {
        match lifecycle::try_wait(true) {
            Ok(Some((_, result, owner))) => {
                let command = &opts.commands[owner.0 as usize];
                println!("[{:>3}] {:<12} {}", owner.0, result.to_string(), command);
                if !result.is_success() {
                    failed += 1;
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("runjobs: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if let Ok(engine) = lifecycle::global() {
        let stats = engine.stats();
        println!(
            "\n{} job(s), {} failed, {} worker(s) of {}, {:?}",
            opts.commands.len(),
            failed,
            stats.workers,
            stats.cap,
            start.elapsed()
        );
    }
    let _ = lifecycle::shutdown();
    ExitCode::from(failed.min(255) as u8)
}
