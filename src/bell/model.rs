use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Weekday};
use thiserror::Error;

pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub const LESSONS_PER_SESSION: u8 = 9;

pub const DEFAULT_SCHOOL_NAME: &str = "Ayarlardan Okul Adınızı Giriniz";

#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownKey {
    kind: &'static str,
    value: String,
}

impl UnknownKey {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[error("malformed time '{0}', expected HH:MM")]
pub struct MalformedTime(pub String);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Session {
    Morning,
    Afternoon,
}

impl Session {
    pub const ALL: [Session; 2] = [Session::Morning, Session::Afternoon];

    pub fn key(self) -> &'static str {
        match self {
            Session::Morning => "Sabah",
            Session::Afternoon => "Öğle",
        }
    }

    fn index(self) -> usize {
        match self {
            Session::Morning => 0,
            Session::Afternoon => 1,
        }
    }
}

impl FromStr for Session {
    type Err = UnknownKey;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        Session::ALL
            .into_iter()
            .find(|session| session.key() == trimmed)
            .or_else(|| match trimmed.to_ascii_lowercase().as_str() {
                "morning" => Some(Session::Morning),
                "afternoon" => Some(Session::Afternoon),
                _ => None,
            })
            .ok_or_else(|| UnknownKey::new("session", input))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum BellType {
    Entry,
    TeacherBell,
    Break,
}

impl BellType {
    pub const ALL: [BellType; 3] = [BellType::Entry, BellType::TeacherBell, BellType::Break];

    pub fn key(self) -> &'static str {
        match self {
            BellType::Entry => "İçeri",
            BellType::TeacherBell => "Öğretmenler",
            BellType::Break => "Teneffüs",
        }
    }

    fn index(self) -> usize {
        match self {
            BellType::Entry => 0,
            BellType::TeacherBell => 1,
            BellType::Break => 2,
        }
    }
}

impl FromStr for BellType {
    type Err = UnknownKey;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        BellType::ALL
            .into_iter()
            .find(|bell| bell.key() == trimmed)
            .or_else(|| match trimmed.to_ascii_lowercase().as_str() {
                "entry" => Some(BellType::Entry),
                "teacher" | "teacher_bell" => Some(BellType::TeacherBell),
                "break" => Some(BellType::Break),
                _ => None,
            })
            .ok_or_else(|| UnknownKey::new("bell type", input))
    }
}

/// Lesson position inside a session, 1 through [`LESSONS_PER_SESSION`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct LessonSlot(u8);

impl LessonSlot {
    pub fn new(number: u8) -> Option<Self> {
        (1..=LESSONS_PER_SESSION)
            .contains(&number)
            .then_some(Self(number))
    }

    pub fn all() -> impl Iterator<Item = LessonSlot> {
        (1..=LESSONS_PER_SESSION).map(LessonSlot)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn key(self) -> String {
        format!("{}.Ders", self.number())
    }

    fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl FromStr for LessonSlot {
    type Err = UnknownKey;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let digits = trimmed.strip_suffix(".Ders").unwrap_or(trimmed);
        digits
            .parse::<u8>()
            .ok()
            .and_then(LessonSlot::new)
            .ok_or_else(|| UnknownKey::new("lesson", input))
    }
}

pub fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Pazartesi",
        Weekday::Tue => "Salı",
        Weekday::Wed => "Çarşamba",
        Weekday::Thu => "Perşembe",
        Weekday::Fri => "Cuma",
        Weekday::Sat => "Cumartesi",
        Weekday::Sun => "Pazar",
    }
}

/// Accepts the on-disk key ("Pazartesi") or any spelling chrono understands ("Mon", "monday").
pub fn parse_weekday(input: &str) -> Result<Weekday, UnknownKey> {
    let trimmed = input.trim();
    WEEKDAYS
        .into_iter()
        .find(|day| weekday_key(*day) == trimmed)
        .or_else(|| trimmed.parse::<Weekday>().ok())
        .ok_or_else(|| UnknownKey::new("weekday", input))
}

/// Shape check only: two digits, a colon, two digits.
pub fn is_time_shape(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.len() == 5
        && bytes[2] == b':'
        && [0, 1, 3, 4]
            .into_iter()
            .all(|index| bytes[index].is_ascii_digit())
}

pub fn parse_scheduled_time(input: &str) -> Result<NaiveTime, MalformedTime> {
    let trimmed = input.trim();
    if !is_time_shape(trimmed) {
        return Err(MalformedTime(trimmed.to_string()));
    }
    NaiveTime::parse_from_str(trimmed, "%H:%M").map_err(|_| MalformedTime(trimmed.to_string()))
}

/// One cell address in the weekly timetable.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct BellSlot {
    pub day: Weekday,
    pub session: Session,
    pub lesson: LessonSlot,
    pub bell: BellType,
}

impl BellSlot {
    pub fn for_day(day: Weekday) -> impl Iterator<Item = BellSlot> {
        Session::ALL.into_iter().flat_map(move |session| {
            LessonSlot::all().flat_map(move |lesson| {
                BellType::ALL.into_iter().map(move |bell| BellSlot {
                    day,
                    session,
                    lesson,
                    bell,
                })
            })
        })
    }

    pub fn all() -> impl Iterator<Item = BellSlot> {
        WEEKDAYS.into_iter().flat_map(BellSlot::for_day)
    }
}

impl fmt::Display for BellSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            weekday_key(self.day),
            self.session.key(),
            self.lesson.key(),
            self.bell.key()
        )
    }
}

// chrono's Weekday has no ordering; timetable order starts on Monday.
impl Ord for BellSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        (
            self.day.num_days_from_monday(),
            self.session,
            self.lesson,
            self.bell,
        )
            .cmp(&(
                other.day.num_days_from_monday(),
                other.session,
                other.lesson,
                other.bell,
            ))
    }
}

impl PartialOrd for BellSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct UpcomingBell {
    pub time: NaiveTime,
    pub slot: BellSlot,
}

type SessionTimes = [[String; BellType::ALL.len()]; LESSONS_PER_SESSION as usize];

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Timetable {
    cells: [[SessionTimes; Session::ALL.len()]; WEEKDAYS.len()],
}

impl Timetable {
    pub fn get(&self, day: Weekday, session: Session, lesson: LessonSlot, bell: BellType) -> &str {
        &self.cells[day.num_days_from_monday() as usize][session.index()][lesson.index()]
            [bell.index()]
    }

    pub fn set(
        &mut self,
        day: Weekday,
        session: Session,
        lesson: LessonSlot,
        bell: BellType,
        value: &str,
    ) {
        self.cells[day.num_days_from_monday() as usize][session.index()][lesson.index()]
            [bell.index()] = value.trim().to_string();
    }

    pub fn get_slot(&self, slot: BellSlot) -> &str {
        self.get(slot.day, slot.session, slot.lesson, slot.bell)
    }

    pub fn set_slot(&mut self, slot: BellSlot, value: &str) {
        self.set(slot.day, slot.session, slot.lesson, slot.bell, value);
    }

    /// Non-empty cells in day, session, lesson, bell order.
    pub fn entries(&self) -> impl Iterator<Item = (BellSlot, &str)> + '_ {
        BellSlot::all()
            .map(|slot| (slot, self.get_slot(slot)))
            .filter(|(_, time)| !time.is_empty())
    }

    pub fn populated_count(&self) -> usize {
        self.entries().count()
    }

    /// Valid bells of `day` strictly after `after`, earliest first.
    pub fn upcoming(&self, day: Weekday, after: NaiveTime) -> Vec<UpcomingBell> {
        let mut bells = BellSlot::for_day(day)
            .filter_map(|slot| {
                let time = parse_scheduled_time(self.get_slot(slot)).ok()?;
                (time > after).then_some(UpcomingBell { time, slot })
            })
            .collect::<Vec<_>>();
        bells.sort();
        bells
    }

    pub fn malformed_entries(&self) -> Vec<(BellSlot, MalformedTime)> {
        self.entries()
            .filter_map(|(slot, time)| parse_scheduled_time(time).err().map(|err| (slot, err)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SoundAssignment {
    paths: [String; BellType::ALL.len()],
}

impl SoundAssignment {
    /// Assigned path, or `None` when the slot is blank.
    pub fn get(&self, bell: BellType) -> Option<&str> {
        let path = self.paths[bell.index()].trim();
        (!path.is_empty()).then_some(path)
    }

    pub fn raw(&self, bell: BellType) -> &str {
        &self.paths[bell.index()]
    }

    pub fn set(&mut self, bell: BellType, path: &str) {
        self.paths[bell.index()] = path.trim().to_string();
    }

    pub fn iter(&self) -> impl Iterator<Item = (BellType, &str)> + '_ {
        BellType::ALL
            .into_iter()
            .map(|bell| (bell, self.raw(bell)))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AppSnapshot {
    pub school_name: String,
    pub school_logo_path: String,
    pub bell_sound_paths: SoundAssignment,
    pub lesson_times: Timetable,
}

impl Default for AppSnapshot {
    fn default() -> Self {
        Self {
            school_name: DEFAULT_SCHOOL_NAME.to_string(),
            school_logo_path: String::new(),
            bell_sound_paths: SoundAssignment::default(),
            lesson_times: Timetable::default(),
        }
    }
}
