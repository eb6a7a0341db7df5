//! Implementation of the `semlock status` and `semlock list` commands.
//!
//! Both only read lock files. They report what an acquire attempt would do
//! without taking or reclaiming anything.

use crate::cli::StatusArgs;
use crate::error::{Result, SemaphoreError};
use crate::exit_codes;
use crate::locks::{
    AcquireLockAction, Backend, LOCK_FILE_EXTENSION, LockAssessment, LockFileSemaphore,
    LockReadOutcome, SemaphoreFactory,
};
use std::path::Path;

/// Execute the `semlock status` command.
pub fn cmd_status(factory: &SemaphoreFactory, args: StatusArgs) -> Result<i32> {
    let semaphore = factory.file_semaphore(&args.name)?;
    let outcome = factory.lock_io().read(semaphore.lock_file_path());

    println!("Lock Status");
    println!("===========");
    println!();
    println!("  Backend:    {}", factory.backend());
    if let Backend::Native(_) = factory.backend() {
        println!("  Note:       native locks are held by the OS and have no lock file");
    }
    print!("{}", render_status(&semaphore, &outcome));

    Ok(exit_codes::SUCCESS)
}

/// Execute the `semlock list` command.
pub fn cmd_list(factory: &SemaphoreFactory) -> Result<i32> {
    let directory = factory.config().lock_directory();
    let names = lock_names(&directory)?;

    if names.is_empty() {
        println!("No lock files in {}.", directory.display());
        return Ok(exit_codes::SUCCESS);
    }

    println!("Lock files ({}):", names.len());
    println!();

    let mut reclaimable = 0;
    for name in &names {
        // Names that would not validate are not ours to report on.
        let Ok(semaphore) = factory.file_semaphore(name) else {
            continue;
        };
        let outcome = factory.lock_io().read(semaphore.lock_file_path());
        let assessment = semaphore.assess(&outcome);
        if assessment.warning().is_some() {
            reclaimable += 1;
        }
        println!("  {:24} {}", name, assessment);
    }

    if reclaimable > 0 {
        println!();
        println!(
            "Note: {} lock(s) would be reclaimed by the next acquire. Use `semlock clear <name> --force` to remove one now.",
            reclaimable
        );
    }

    Ok(exit_codes::SUCCESS)
}

/// Lock names (file stems of `*.lck` files) in `directory`, sorted.
pub(super) fn lock_names(directory: &Path) -> Result<Vec<String>> {
    if !directory.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(directory).map_err(|e| {
        SemaphoreError::Io(format!(
            "failed to read lock directory '{}': {}",
            directory.display(),
            e
        ))
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            SemaphoreError::Io(format!("failed to read lock directory entry: {}", e))
        })?;
        let path = entry.path();

        // Skip non-lock files
        if path.extension().and_then(|e| e.to_str()) != Some(LOCK_FILE_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }

    names.sort();
    Ok(names)
}

/// Human-readable report for one lock file.
pub(super) fn render_status(semaphore: &LockFileSemaphore, outcome: &LockReadOutcome) -> String {
    let assessment = semaphore.assess(outcome);
    let mut out = String::new();

    out.push_str(&format!("  Lock:       {}\n", semaphore.name()));
    out.push_str(&format!("  Path:       {}\n", semaphore.lock_file_path().display()));
    out.push_str(&format!("  State:      {}\n", outcome));

    if let Some(record) = outcome.record() {
        out.push_str(&format!(
            "  Owner:      process {} ({}), thread {}\n",
            record.process_id, record.process_name, record.thread_id
        ));
        out.push_str(&format!(
            "  Acquired:   {} ({} ago)\n",
            record.acquired_at().format("%Y-%m-%d %H:%M:%S UTC"),
            record.age_string()
        ));
        let running = !matches!(assessment, LockAssessment::Abandoned(_));
        out.push_str(&format!(
            "  Running:    {}\n",
            if running { "yes" } else { "no" }
        ));
    }

    out.push_str(&format!(
        "  Timeout:    {}s\n",
        semaphore.lock_timeout().as_secs()
    ));
    out.push_str(&format!(
        "  Decision:   {} ({})\n",
        assessment,
        match assessment.action() {
            AcquireLockAction::DontAcquireLock => "wait",
            AcquireLockAction::AcquireLock => "acquire",
            AcquireLockAction::ForciblyAcquireLock => "forcibly acquire",
        }
    ));

    out
}
