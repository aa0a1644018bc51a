use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};

use super::Disk;

const PROGRAM_EXTENSIONS: [&str; 2] = ["asm", "txt"];

/// Reads every `*.asm` and `*.txt` file in `dir`, sorted by file name.
///
/// Each program is named after its file stem.
pub fn read_programs_from_dir(dir: &Path) -> io::Result<Vec<(String, Vec<String>)>> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(str::to_ascii_lowercase)
                    .map_or(false, |ext| PROGRAM_EXTENSIONS.contains(&ext.as_str()))
        })
        .collect();
    paths.sort();

    let mut programs = Vec::new();
    for path in paths {
        let name = match path.file_stem().and_then(|stem| stem.to_str()) {
            Some(name) => name.to_string(),
            None => {
                warn!("Skipping file with unreadable name: {}", path.display());
                continue;
            }
        };

        let lines: Vec<String> = fs::read_to_string(&path)?.lines().map(str::to_string).collect();
        programs.push((name, lines));
    }

    Ok(programs)
}

/// Loads the programs in `dir` onto the disk. Returns the names stored.
pub fn load_programs_from_dir(dir: &Path, disk: &mut Disk) -> io::Result<Vec<String>> {
    let programs = read_programs_from_dir(dir)?;
    let found = programs.len();
    let names = disk.write_programs(programs);

    info!("Loaded {} of {} programs from {}", names.len(), found, dir.display());
    Ok(names)
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::path::PathBuf;

    use super::*;
    use crate::io::ProgramSource;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir()
            .join(format!("process-simulator-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_programs_from_dir() {
        let dir = scratch_dir("loader");
        fs::write(dir.join("b.asm"), "MOV AX, 5\nADD AX\nINT 20H\n").unwrap();
        fs::write(dir.join("a.txt"), "INC\n").unwrap();
        fs::write(dir.join("notes.md"), "not a program").unwrap();

        let mut disk = Disk::default();
        let names = load_programs_from_dir(&dir, &mut disk).unwrap();

        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(disk.read_program("b").unwrap().len(), 3);
        assert!(disk.read_program("notes").is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_programs_skips_oversized() {
        let dir = scratch_dir("oversized");
        fs::write(dir.join("big.asm"), "INC\n".repeat(20)).unwrap();
        fs::write(dir.join("small.asm"), "INC\n").unwrap();

        let mut disk = Disk::new(16, 4);
        let names = load_programs_from_dir(&dir, &mut disk).unwrap();
        assert_eq!(names, vec!["small".to_string()]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_programs_missing_dir() {
        let mut disk = Disk::default();
        let missing = Path::new("/nonexistent/process-simulator");
        assert!(load_programs_from_dir(missing, &mut disk).is_err());
    }
}
