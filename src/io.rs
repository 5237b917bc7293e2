

//! The crate's file boundary: the parser contract for instrument files,
//! the DCD monitor table reader, the fallback search for mislaid data
//! files, and the reduced-curve writer.
//!
//! Instrument parsers themselves live outside this crate; every beamline
//! writes its own file layout, and the pipeline only cares that a parser
//! can deliver a well-formed [`Scan`].

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::scan::Scan;


/// Turns one instrument file into one [`Scan`].
pub trait ScanParser {
    fn parse(&self, path: &Path) -> Result<Scan>;
}

/// Any closure with the right shape is a parser.
impl<F> ScanParser for F where F: Fn(&Path) -> Result<Scan> {
    fn parse(&self, path: &Path) -> Result<Scan> {
        self(path)
    }
}


/// Column names of the monitor table as the I07 acquisition writes them.
pub const MONITOR_Q_COLUMN: &str = "qdcd_";
pub const MONITOR_INTENSITY_COLUMN: &str = "adc2";

/// Read the `(q, monitor intensity)` table from a DCD normalisation `.dat`
/// file, sorted by q.
pub fn load_monitor_table(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    load_monitor_columns(path, MONITOR_Q_COLUMN, MONITOR_INTENSITY_COLUMN)
}

/// As [`load_monitor_table`], naming the two columns explicitly.
///
/// The format interleaves a `<MetaDataAtStart>` block and an ` &END` marker
/// before the data; the first line after the marker names the columns and
/// everything after it is whitespace-separated numbers.
pub fn load_monitor_columns(path: &Path, q_column: &str, intensity_column: &str) -> Result<(Vec<f64>, Vec<f64>)> {
    let content = fs::read_to_string(path)?;

    let mut lines = content.lines();
    for line in &mut lines {
        if line.contains("&END") { break }
    }

    let header = lines.by_ref()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| Error::parse(format!("{}: no column header after &END", path.display())))?;

    let names: Vec<&str> = header.split_whitespace().collect();
    let q_index = names.iter().position(|&name| name == q_column)
        .ok_or_else(|| Error::parse(format!("{}: no {:?} column", path.display(), q_column)))?;
    let intensity_index = names.iter().position(|&name| name == intensity_column)
        .ok_or_else(|| Error::parse(format!("{}: no {:?} column", path.display(), intensity_column)))?;

    let mut table = Vec::new();
    for line in lines {
        if line.trim().is_empty() { continue }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let parse = |index: usize| -> Result<f64> {
            fields.get(index)
                .and_then(|field| field.parse().ok())
                .filter(|value: &f64| value.is_finite())
                .ok_or_else(|| Error::parse(format!(
                    "{}: unreadable data row {:?}", path.display(), line
                )))
        };

        table.push((parse(q_index)?, parse(intensity_index)?));
    }

    if table.is_empty() {
        return Err(Error::parse(format!("{}: the monitor table is empty", path.display())));
    }

    table.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("non-finite monitor q"));
    Ok(table.into_iter().unzip())
}


/// Locate a declared data file, falling back to a basename search when the
/// declared path is stale (data gets copied between beamline and analysis
/// machines, breaking absolute paths).
///
/// Searches the working directory and the recipe's directory recursively,
/// and each further ancestor of the recipe for a direct child of that name.
/// Exactly one distinct hit is accepted; none or several is [`Error::FileNotFound`].
pub fn find_file(declared: &Path, recipe_path: Option<&Path>) -> Result<PathBuf> {
    if declared.is_file() {
        return Ok(declared.to_path_buf());
    }

    let basename = declared.file_name()
        .ok_or_else(|| Error::file_not_found(format!("{} names no file", declared.display())))?;

    let mut candidates = BTreeSet::new();

    let mut walk_roots = Vec::new();
    if let Ok(working_directory) = std::env::current_dir() {
        walk_roots.push(working_directory);
    }

    if let Some(recipe) = recipe_path {
        let mut ancestors = recipe.ancestors().skip(1);

        if let Some(recipe_directory) = ancestors.next() {
            walk_roots.push(recipe_directory.to_path_buf());

            for ancestor in ancestors {
                let direct = ancestor.join(basename);
                if direct.is_file() {
                    candidates.insert(direct.canonicalize().unwrap_or(direct));
                }
            }
        }
    }

    for root in walk_roots {
        let hits = walkdir::WalkDir::new(root).into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name() == basename);

        for hit in hits {
            let path = hit.into_path();
            candidates.insert(path.canonicalize().unwrap_or(path));
        }
    }

    match candidates.len() {
        1 => {
            let found = candidates.into_iter().next().expect("one candidate");
            log::debug!("{} located at {}", declared.display(), found.display());
            Ok(found)
        },

        0 => Err(Error::file_not_found(format!(
            "{} does not exist and nothing matching its name was found",
            declared.display()
        ))),

        count => Err(Error::file_not_found(format!(
            "{} does not exist and {} distinct files share its name",
            declared.display(), count
        ))),
    }
}


/// Write the reduced curve: `#`-prefixed header lines, a `#`-prefixed
/// column-name line, then one whitespace-separated row per point.
pub fn write_reduced(path: &Path, header: &str, columns: &[(&str, &[f64])]) -> Result<()> {
    let row_count = columns.first().map(|(_, values)| values.len()).unwrap_or(0);
    if columns.iter().any(|(_, values)| values.len() != row_count) {
        return Err(Error::invariant("output columns disagree in length"));
    }

    let mut file = fs::File::create(path)?;

    for line in header.lines() {
        writeln!(file, "# {}", line)?;
    }

    let names: Vec<&str> = columns.iter().map(|&(name, _)| name).collect();
    writeln!(file, "# {}", names.join(" "))?;

    for row in 0..row_count {
        let mut fields = Vec::with_capacity(columns.len());
        for (_, values) in columns {
            fields.push(format!("{:.18e}", values[row]));
        }
        writeln!(file, "{}", fields.join(" "))?;
    }

    Ok(())
}


/// `YYYY-mm-dd_HHhMMmSSs`, UTC, for default output filenames.
pub(crate) fn timestamp() -> String {
    let unix_seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    format_timestamp(unix_seconds)
}

fn format_timestamp(unix_seconds: u64) -> String {
    let days = (unix_seconds / 86_400) as i64;
    let seconds_of_day = unix_seconds % 86_400;

    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02}_{:02}h{:02}m{:02}s",
        year, month, day,
        seconds_of_day / 3600, (seconds_of_day / 60) % 60, seconds_of_day % 60,
    )
}

/// Gregorian date from days since 1970-01-01 (Howard Hinnant's algorithm).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let days = days + 719_468;
    let era = if days >= 0 { days } else { days - 146_096 } / 146_097;
    let day_of_era = days - era * 146_097;
    let year_of_era = (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_point = (5 * day_of_year + 2) / 153;
    let day = (day_of_year - (153 * month_point + 2) / 5 + 1) as u32;
    let month = if month_point < 10 { month_point + 3 } else { month_point - 9 } as u32;
    let year = year_of_era + era * 400 + i64::from(month <= 2);

    (year, month, day)
}


#[cfg(test)]
mod tests {
    use super::*;

    const MONITOR_FILE: &str = "\
<MetaDataAtStart>
cmd=scan qdcd 0.01 0.09 0.02
date=2021-08-06
</MetaDataAtStart>
 &END
qdcd_ adc2 extra
0.05 120.5 0
0.01 100.0 0
0.03 110.25 0
";

    #[test]
    fn monitor_table_is_parsed_and_sorted() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("qdcd_norm.dat");
        fs::write(&path, MONITOR_FILE).unwrap();

        let (q, intensity) = load_monitor_table(&path).unwrap();
        assert_eq!(q, vec![0.01, 0.03, 0.05]);
        assert_eq!(intensity, vec![100.0, 110.25, 120.5]);
    }

    #[test]
    fn monitor_table_without_the_named_column_fails() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("broken.dat");
        fs::write(&path, " &END\nqdcd_ other\n0.01 1.0\n").unwrap();

        assert!(matches!(load_monitor_table(&path), Err(Error::Parse(_))));
    }

    #[test]
    fn existing_paths_are_used_directly() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("i07-1.nxs");
        fs::write(&path, "").unwrap();

        assert_eq!(find_file(&path, None).unwrap(), path);
    }

    #[test]
    fn a_unique_basename_match_is_recovered() {
        let directory = tempfile::tempdir().unwrap();
        let nested = directory.path().join("experiment/data");
        fs::create_dir_all(&nested).unwrap();

        let actual = nested.join("i07-413244.nxs");
        fs::write(&actual, "").unwrap();

        let recipe = directory.path().join("experiment/recipe.yaml");
        fs::write(&recipe, "").unwrap();

        let declared = Path::new("/dls/old/location/i07-413244.nxs");
        let found = find_file(declared, Some(&recipe)).unwrap();
        assert_eq!(found, actual.canonicalize().unwrap());
    }

    #[test]
    fn ambiguous_matches_are_refused() {
        let directory = tempfile::tempdir().unwrap();
        for sub in ["a", "b"] {
            let nested = directory.path().join(sub);
            fs::create_dir_all(&nested).unwrap();
            fs::write(nested.join("i07-5.nxs"), "").unwrap();
        }

        let recipe = directory.path().join("recipe.yaml");
        fs::write(&recipe, "").unwrap();

        let result = find_file(Path::new("/gone/i07-5.nxs"), Some(&recipe));
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn written_files_carry_header_and_rows() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("reduced.dat");

        write_reduced(
            &path,
            "instrument: i07\nvisit:\n  visit id: v\n",
            &[("Q(1/Å)", &[0.01, 0.02]), ("R", &[1.0, 0.5]), ("R_error", &[0.1, 0.05])],
        ).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();

        assert!(lines[0].starts_with("# instrument"));
        assert_eq!(lines[3], "# Q(1/Å) R R_error");
        assert_eq!(lines.len(), 6);

        let first_row: Vec<f64> = lines[4].split_whitespace()
            .map(|field| field.parse().unwrap())
            .collect();
        assert_eq!(first_row, vec![0.01, 1.0, 0.1]);
    }

    #[test]
    fn mismatched_columns_are_refused() {
        let directory = tempfile::tempdir().unwrap();
        let result = write_reduced(
            &directory.path().join("x.dat"),
            "",
            &[("a", &[1.0, 2.0]), ("b", &[1.0])],
        );
        assert!(matches!(result, Err(Error::Invariant(_))));
    }

    #[test]
    fn timestamps_format_known_instants() {
        // 2021-08-06 12:20:05 UTC
        assert_eq!(format_timestamp(1_628_252_405), "2021-08-06_12h20m05s");
    }
}
