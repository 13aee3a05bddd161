//! CLI smoke tests for the lessonforge binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const CLEAN_LESSON: &str = r#""use client";
import React, { useState } from 'react';
import { Star } from 'lucide-react';

export default function LessonComponent() {
  const [score, setScore] = useState(3);
  return (
    <div className="p-6 bg-yellow-200">
      <h1>Fractions <Star className="w-4" /></h1>
      <p>Score: {score}</p>
      <button className="bg-green-200" onClick={() => setScore(score + 1)}>More</button>
    </div>
  );
}
"#;

fn lessonforge() -> Command {
    cargo_bin_cmd!("lessonforge")
}

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        lessonforge()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("generate"))
            .stdout(predicate::str::contains("validate"))
            .stdout(predicate::str::contains("serve"));
    }

    #[test]
    fn test_version() {
        lessonforge()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("lessonforge"));
    }

    #[test]
    fn test_unknown_command_fails() {
        lessonforge().arg("teach").assert().failure();
    }
}

mod validate {
    use super::*;

    #[test]
    fn test_clean_file_passes() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "lesson.tsx", CLEAN_LESSON);
        lessonforge()
            .arg("validate")
            .arg(&file)
            .arg("--probe")
            .assert()
            .success()
            .stdout(predicate::str::contains(": ok"));
    }

    #[test]
    fn test_violations_exit_nonzero() {
        let dir = TempDir::new().unwrap();
        let source = CLEAN_LESSON
            .replace("bg-green-200", "hover:bg-green-300")
            .replace("import { Star } from 'lucide-react';", "import axios from 'axios';");
        let file = write(&dir, "bad.tsx", &source);
        lessonforge()
            .arg("validate")
            .arg(&file)
            .assert()
            .code(1)
            .stdout(predicate::str::contains("Import not allowed: axios"))
            .stdout(predicate::str::contains("Hover styles are not allowed: hover:bg-green-300"));
    }

    #[test]
    fn test_json_report() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "evil.tsx", &CLEAN_LESSON.replace("useState(3)", "eval('3')"));
        let output = lessonforge()
            .arg("validate")
            .arg(&file)
            .arg("--json")
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["accepted"], false);
        assert!(
            report["violations"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v["code"] == "blocked_capability")
        );
    }

    #[test]
    fn test_missing_file_fails() {
        lessonforge()
            .arg("validate")
            .arg("/nonexistent/lesson.tsx")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read"));
    }
}

mod render {
    use super::*;

    #[test]
    fn test_render_file_prints_html() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "lesson.tsx", CLEAN_LESSON);
        lessonforge()
            .current_dir(dir.path())
            .arg("render")
            .arg("--file")
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("<p>Score: 3</p>"))
            .stdout(predicate::str::contains("data-icon=\"Star\""));
    }

    #[test]
    fn test_render_unknown_id_fails() {
        let dir = TempDir::new().unwrap();
        lessonforge()
            .current_dir(dir.path())
            .arg("render")
            .arg("does-not-exist")
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }
}

mod config {
    use super::*;

    #[test]
    fn test_config_init_then_show() {
        let dir = TempDir::new().unwrap();
        lessonforge()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created lessonforge.toml"));
        assert!(dir.path().join(".lessonforge/lessonforge.toml").exists());

        lessonforge()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("bounded_retries = 3"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".lessonforge")).unwrap();
        fs::write(
            dir.path().join(".lessonforge/lessonforge.toml"),
            "[pipeline]\nbounded_retries = 0\n",
        )
        .unwrap();
        lessonforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("bounded_retries is 0"));
    }
}
