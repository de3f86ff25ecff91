use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use tracing::{debug, info, warn};

use crate::bell::model::{AppSnapshot, BellSlot, BellType, UpcomingBell, parse_scheduled_time};
use crate::bell::rung::{RungIdentifier, RungSet};
use crate::playback::{NotificationPort, PlaybackError, SpecialSound};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct TickOutcome {
    pub matched: usize,
    pub rung: usize,
    pub unassigned: usize,
    pub playback_failures: usize,
    pub day_reset: bool,
    pub caught_up: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FiredBell {
    pub slot: BellSlot,
    pub time: String,
    pub sound_path: String,
}

/// Operator settings commit. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub school_name: Option<String>,
    pub school_logo_path: Option<String>,
    pub bell_sound_paths: Vec<(BellType, String)>,
}

pub struct BellScheduler<P> {
    snapshot: AppSnapshot,
    rung: RungSet,
    port: P,
    last_fired: Option<FiredBell>,
}

impl<P: NotificationPort> BellScheduler<P> {
    /// Seeds the rung-set with `now`'s date and marks bells already behind `now` as rung.
    pub fn new_with_now(snapshot: AppSnapshot, port: P, now: NaiveDateTime) -> Self {
        let mut scheduler = Self {
            snapshot,
            rung: RungSet::new(now.date()),
            port,
            last_fired: None,
        };
        let caught_up = scheduler.catch_up_for_day(now.weekday(), now.time());
        info!(
            date = %now.date(),
            caught_up,
            "bell scheduler started"
        );
        scheduler
    }

    pub fn tick(&mut self, now: NaiveDateTime) -> TickOutcome {
        let mut caught_up = 0;
        let day_reset = self.rung.reset_for_new_day(now.date());
        if day_reset {
            caught_up = self.catch_up_for_day(now.weekday(), now.time());
            info!(date = %now.date(), caught_up, "new day, rung bells cleared");
        }

        let now_hhmm = now.format("%H:%M").to_string();
        let mut outcome = self.on_tick(&now_hhmm, now.weekday());
        outcome.day_reset = day_reset;
        outcome.caught_up = caught_up;
        outcome
    }

    pub fn on_tick(&mut self, now_hhmm: &str, day: Weekday) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        for slot in BellSlot::for_day(day) {
            let scheduled = self.snapshot.lesson_times.get_slot(slot);
            if scheduled.is_empty() {
                continue;
            }
            if let Err(err) = parse_scheduled_time(scheduled) {
                debug!(%slot, error = %err, "ignoring malformed bell time");
                continue;
            }
            if scheduled != now_hhmm {
                continue;
            }

            let identifier = RungIdentifier::new(scheduled, slot);
            if self.rung.has_rung(&identifier) {
                continue;
            }
            outcome.matched += 1;

            // Left unmarked so a sound assigned later in the same minute still rings.
            let Some(sound_path) = self.snapshot.bell_sound_paths.get(slot.bell) else {
                warn!(%slot, time = scheduled, "no sound assigned for bell type, bell not rung");
                outcome.unassigned += 1;
                continue;
            };

            info!(%slot, time = scheduled, sound = sound_path, "ringing bell");
            if let Err(err) = self.port.request_playback(Path::new(sound_path)) {
                warn!(%slot, error = %err, "bell playback failed");
                outcome.playback_failures += 1;
            }
            self.port.notify_bell_fired();
            self.last_fired = Some(FiredBell {
                slot,
                time: scheduled.to_string(),
                sound_path: sound_path.to_string(),
            });
            self.rung.mark_rung(identifier);
            outcome.rung += 1;
        }
        outcome
    }

    /// Marks every bell of `day` scheduled strictly before `current` as rung, without playback.
    pub fn catch_up_for_day(&mut self, day: Weekday, current: NaiveTime) -> usize {
        let mut marked = 0;
        for slot in BellSlot::for_day(day) {
            let scheduled = self.snapshot.lesson_times.get_slot(slot);
            if scheduled.is_empty() {
                continue;
            }
            match parse_scheduled_time(scheduled) {
                Ok(time) if time < current => {
                    if self.rung.mark_rung(RungIdentifier::new(scheduled, slot)) {
                        debug!(%slot, time = scheduled, "past bell marked as rung");
                        marked += 1;
                    }
                }
                Ok(_) => {}
                Err(err) => debug!(%slot, error = %err, "skipping malformed bell time"),
            }
        }
        marked
    }

    /// Rings a bell type by hand. The rung-set is left alone. The indicator is
    /// raised even when playback cannot start.
    pub fn ring_now(&mut self, bell: BellType) -> Result<(), PlaybackError> {
        let result = match self.snapshot.bell_sound_paths.get(bell) {
            Some(sound_path) => {
                info!(bell = bell.key(), sound = sound_path, "manual bell");
                self.port.request_playback(Path::new(sound_path))
            }
            None => Err(PlaybackError::Unassigned(bell.key())),
        };
        self.port.notify_bell_fired();
        result
    }

    pub fn play_special(
        &mut self,
        sound: SpecialSound,
        sirens_dir: &Path,
    ) -> Result<PathBuf, PlaybackError> {
        let path = sound.path_in(sirens_dir);
        info!(sound = sound.key(), path = %path.display(), "special sound");
        let result = self.port.request_playback(&path);
        self.port.notify_bell_fired();
        result.map(|()| path)
    }

    pub fn stop_playback(&mut self) {
        self.port.stop_playback();
    }
}

impl<P> BellScheduler<P> {
    pub fn upcoming_bells(&self, day: Weekday, after: NaiveTime) -> Vec<UpcomingBell> {
        self.snapshot.lesson_times.upcoming(day, after)
    }

    pub fn next_bell(&self, now: NaiveDateTime) -> Option<UpcomingBell> {
        self.upcoming_bells(now.weekday(), now.time())
            .into_iter()
            .next()
    }

    pub fn snapshot(&self) -> &AppSnapshot {
        &self.snapshot
    }

    pub fn set_lesson_time(&mut self, slot: BellSlot, value: &str) {
        self.snapshot.lesson_times.set_slot(slot, value);
    }

    pub fn set_sound_path(&mut self, bell: BellType, path: &str) {
        self.snapshot.bell_sound_paths.set(bell, path);
    }

    pub fn set_school_name(&mut self, name: &str) {
        self.snapshot.school_name = name.trim().to_string();
    }

    pub fn set_school_logo_path(&mut self, path: &str) {
        self.snapshot.school_logo_path = path.trim().to_string();
    }

    pub fn apply_settings(&mut self, update: SettingsUpdate) {
        if let Some(name) = update.school_name {
            self.set_school_name(&name);
        }
        if let Some(path) = update.school_logo_path {
            self.set_school_logo_path(&path);
        }
        for (bell, path) in update.bell_sound_paths {
            self.set_sound_path(bell, &path);
        }
    }

    pub fn rung(&self) -> &RungSet {
        &self.rung
    }

    pub fn last_fired(&self) -> Option<&FiredBell> {
        self.last_fired.as_ref()
    }

    #[cfg(test)]
    pub fn port(&self) -> &P {
        &self.port
    }
}
