//! Citi Bike System Data archives
//!
//! Each archive is a zip of one or more CSV files. Column order and
//! timestamp format changed over the years, so the header of every CSV is
//! mapped by name and three timestamp layouts are accepted.

use chrono::NaiveDateTime;
use std::io::{Cursor, Read};
use tracing::{debug, warn};
use zip::ZipArchive;

use journeys_common::{Coordinates, JourneysError, Station, Trip};

use super::{SourceError, TripReader};

const TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

pub fn parse_timestamp(value: &str) -> journeys_common::Result<NaiveDateTime> {
    let value = value.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| JourneysError::InvalidTimestamp {
            value: value.to_string(),
            reason: "no known timestamp layout matches".to_string(),
        })
}

/// Positions of the ten columns a trip is built from
#[derive(Debug, Clone, Copy)]
struct Columns {
    start_time: usize,
    stop_time: usize,
    start_id: usize,
    start_name: usize,
    start_lat: usize,
    start_lon: usize,
    end_id: usize,
    end_name: usize,
    end_lat: usize,
    end_lon: usize,
}

impl Columns {
    fn from_header(file: &str, header: &csv::StringRecord) -> Result<Self, SourceError> {
        let find = |names: &[&str]| {
            header.iter().position(|column| {
                let column = column.trim().trim_start_matches('\u{feff}').to_lowercase();
                names.contains(&column.as_str())
            })
        };

        let wanted: [(&'static str, &[&str]); 10] = [
            ("starttime", &["starttime", "start time"]),
            ("stoptime", &["stoptime", "stop time"]),
            ("start station id", &["start station id"]),
            ("start station name", &["start station name"]),
            ("start station latitude", &["start station latitude"]),
            ("start station longitude", &["start station longitude"]),
            ("end station id", &["end station id"]),
            ("end station name", &["end station name"]),
            ("end station latitude", &["end station latitude"]),
            ("end station longitude", &["end station longitude"]),
        ];

        let mut found = [0usize; 10];
        let mut missing = Vec::new();
        for (slot, (name, aliases)) in found.iter_mut().zip(wanted) {
            match find(aliases) {
                Some(idx) => *slot = idx,
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            return Err(SourceError::MissingColumns {
                file: file.to_string(),
                missing,
            });
        }

        let [start_time, stop_time, start_id, start_name, start_lat, start_lon, end_id, end_name, end_lat, end_lon] =
            found;
        Ok(Self {
            start_time,
            stop_time,
            start_id,
            start_name,
            start_lat,
            start_lon,
            end_id,
            end_name,
            end_lat,
            end_lon,
        })
    }

    fn parse(&self, record: &csv::StringRecord) -> journeys_common::Result<Trip> {
        let field = move |idx: usize, name: &'static str| {
            record
                .get(idx)
                .map(str::trim)
                .ok_or_else(|| JourneysError::invalid_field(name, ""))
        };
        let id = |idx: usize, name: &'static str| -> journeys_common::Result<i64> {
            let value = field(idx, name)?;
            value
                .parse::<i64>()
                .map_err(|_| JourneysError::invalid_field(name, value))
        };
        let degrees = |idx: usize, name: &'static str| -> journeys_common::Result<f64> {
            let value = field(idx, name)?;
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| JourneysError::invalid_field(name, value))
        };

        Ok(Trip {
            start_time: parse_timestamp(field(self.start_time, "starttime")?)?,
            stop_time: parse_timestamp(field(self.stop_time, "stoptime")?)?,
            start: Station::new(
                id(self.start_id, "start station id")?,
                field(self.start_name, "start station name")?,
                Coordinates::new(
                    degrees(self.start_lat, "start station latitude")?,
                    degrees(self.start_lon, "start station longitude")?,
                ),
            ),
            end: Station::new(
                id(self.end_id, "end station id")?,
                field(self.end_name, "end station name")?,
                Coordinates::new(
                    degrees(self.end_lat, "end station latitude")?,
                    degrees(self.end_lon, "end station longitude")?,
                ),
            ),
        })
    }
}

#[derive(Debug)]
struct OpenCsv {
    name: String,
    columns: Columns,
    records: csv::Reader<Cursor<Vec<u8>>>,
}

/// Reads trips from every CSV file of one archive in turn.
///
/// Entries are decompressed one at a time as the reader reaches them.
#[derive(Debug)]
pub struct TripdataReader {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    entries: Vec<usize>,
    next_entry: usize,
    current: Option<OpenCsv>,
    record: csv::StringRecord,
    skipped: u64,
}

impl TripdataReader {
    pub fn new(archive: Vec<u8>) -> Result<Self, SourceError> {
        let mut archive = ZipArchive::new(Cursor::new(archive))?;

        let mut entries = Vec::new();
        for idx in 0..archive.len() {
            let file = archive.by_index(idx)?;
            let name = file.name();
            // __MACOSX resource forks
            if file.is_dir() || name.starts_with('_') || !name.ends_with(".csv") {
                continue;
            }
            entries.push(idx);
        }
        if entries.is_empty() {
            return Err(SourceError::NoCsvFiles);
        }

        Ok(Self {
            archive,
            entries,
            next_entry: 0,
            current: None,
            record: csv::StringRecord::new(),
            skipped: 0,
        })
    }

    /// Number of CSV files in the archive
    pub fn files(&self) -> usize {
        self.entries.len()
    }

    fn open_next(&mut self) -> Result<bool, SourceError> {
        let Some(&idx) = self.entries.get(self.next_entry) else {
            return Ok(false);
        };
        self.next_entry += 1;

        let mut file = self.archive.by_index(idx)?;
        let name = file.name().to_string();
        let mut contents = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut contents)?;

        let mut records = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(Cursor::new(contents));
        let columns = Columns::from_header(&name, records.headers()?)?;

        debug!(file = %name, "Opened CSV file");
        self.current = Some(OpenCsv {
            name,
            columns,
            records,
        });
        Ok(true)
    }
}

impl TripReader for TripdataReader {
    fn next_trip(&mut self) -> Result<Option<Trip>, SourceError> {
        loop {
            let Some(csv) = self.current.as_mut() else {
                if self.open_next()? {
                    continue;
                }
                return Ok(None);
            };

            if !csv.records.read_record(&mut self.record)? {
                debug!(file = %csv.name, "Finished CSV file");
                self.current = None;
                continue;
            }

            match csv.columns.parse(&self.record) {
                Ok(trip) => return Ok(Some(trip)),
                Err(e) => {
                    self.skipped += 1;
                    let line = self.record.position().map(|p| p.line());
                    warn!(file = %csv.name, line, error = %e, "Skipping trip");
                },
            }
        }
    }

    fn skipped(&self) -> u64 {
        self.skipped
    }
}
