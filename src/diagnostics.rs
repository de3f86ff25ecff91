use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDateTime};

use crate::bell::model::{BellSlot, BellType, WEEKDAYS, weekday_key};
use crate::playback::{PlaybackBackend, SpecialSound};
use crate::store::LoadedSnapshot;

pub struct DiagnosticsInput<'a> {
    pub data_file: &'a Path,
    pub loaded: &'a LoadedSnapshot,
    pub backend: &'a PlaybackBackend,
    pub sirens_dir: &'a Path,
    pub clock_label: &'static str,
    pub now: NaiveDateTime,
}

pub fn run_diagnostics(input: &DiagnosticsInput<'_>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_report(&mut out, input).context("failed to write diagnostics report")
}

pub fn write_report(out: &mut impl Write, input: &DiagnosticsInput<'_>) -> io::Result<()> {
    let snapshot = &input.loaded.snapshot;
    let timetable = &snapshot.lesson_times;

    writeln!(out, "School bell diagnostics")?;
    writeln!(
        out,
        "Data file: {} ({})",
        input.data_file.display(),
        presence(input.data_file)
    )?;
    if let Some(err) = input.loaded.error.as_ref() {
        writeln!(out, "Load error: {err}")?;
        writeln!(out, "  Using built-in defaults")?;
    }
    writeln!(out, "School name: {}", snapshot.school_name)?;
    if !snapshot.school_logo_path.is_empty() {
        writeln!(
            out,
            "School logo: {} ({})",
            snapshot.school_logo_path,
            presence(Path::new(&snapshot.school_logo_path))
        )?;
    }

    writeln!(
        out,
        "Bell times: {} of {} slots populated",
        timetable.populated_count(),
        BellSlot::all().count()
    )?;
    for day in WEEKDAYS {
        let count = BellSlot::for_day(day)
            .filter(|slot| !timetable.get_slot(*slot).is_empty())
            .count();
        writeln!(out, "  {}: {count}", weekday_key(day))?;
    }

    let malformed = timetable.malformed_entries();
    writeln!(out, "Malformed bell times: {}", malformed.len())?;
    for (slot, err) in &malformed {
        writeln!(out, "  {slot}: {err}")?;
    }

    writeln!(out, "Bell sounds:")?;
    for bell in BellType::ALL {
        match snapshot.bell_sound_paths.get(bell) {
            Some(path) => writeln!(
                out,
                "  {}: {path} ({})",
                bell.key(),
                presence(Path::new(path))
            )?,
            None => writeln!(out, "  {}: unassigned, bells of this type will not ring", bell.key())?,
        }
    }

    writeln!(out, "Playback backend: {}", input.backend.label())?;
    writeln!(
        out,
        "Sirens directory: {} ({})",
        input.sirens_dir.display(),
        presence(input.sirens_dir)
    )?;
    for sound in SpecialSound::ALL {
        let path = sound.path_in(input.sirens_dir);
        writeln!(out, "  {}: {}", sound.key(), presence(&path))?;
    }

    writeln!(
        out,
        "Selected clock: {} ({} {})",
        input.clock_label,
        weekday_key(input.now.weekday()),
        input.now.format("%Y-%m-%d %H:%M:%S")
    )?;
    match timetable.upcoming(input.now.weekday(), input.now.time()).first() {
        Some(next) => writeln!(
            out,
            "Next bell today: {} {}",
            next.time.format("%H:%M"),
            next.slot
        )?,
        None => writeln!(out, "Next bell today: none")?,
    }
    Ok(())
}

fn presence(path: &Path) -> &'static str {
    if path.exists() { "found" } else { "missing" }
}
