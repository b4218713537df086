use serde_json::json;
use sieve_cli::input::Input;
use sieve_cli::runner::Runner;
use std::path::Path;

/// 300 targets and 30 decoys, one spectrum match per peptide and three
/// peptides per protein group
fn write_project(path: &Path) -> anyhow::Result<()> {
    let mut spectrum_matches = Vec::new();
    let mut peptides = Vec::new();
    let mut groups = Vec::new();
    for ix in 0..330u64 {
        let decoy = ix >= 300;
        let score = match decoy {
            false => ix as f64 / 300.0,
            true => 0.5 + (ix - 300) as f64 / 60.0,
        };
        let accession = match decoy {
            true => format!("DECOY_P{}", ix / 3),
            false => format!("P{}", ix / 3),
        };
        spectrum_matches.push(json!({
            "key": ix,
            "spectrum_file": "run.mzML",
            "charge": 2,
            "score": score,
            "decoy": decoy,
            "theoretical_mz": 600.0,
            "experimental_mz": 600.0,
        }));
        peptides.push(json!({
            "key": ix,
            "sequence": format!("PEPTIDE{}K", ix),
            "decoy": decoy,
            "spectrum_matches": [ix],
            "proteins": [accession],
        }));
        if ix % 3 == 0 {
            groups.push(json!({
                "key": ix / 3,
                "accessions": [accession],
                "leading_accession": accession,
                "peptides": [ix, ix + 1, ix + 2],
                "decoy": decoy,
            }));
        }
    }
    let project = json!({
        "spectrum_matches": spectrum_matches,
        "peptides": peptides,
        "protein_groups": groups,
        "proteins": [{ "accession": "P0", "description": "Putative protein", "evidence": 2 }],
        "manual": [{ "level": "spectrum", "key": 299, "validation": "confident" }],
    });
    std::fs::write(path, serde_json::to_vec(&project)?)?;
    Ok(())
}

#[test]
fn integration() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let project = dir.path().join("project.json");
    write_project(&project)?;

    let parameters = dir.path().join("parameters.json");
    let output = dir.path().join("out");
    std::fs::write(
        &parameters,
        serde_json::to_vec(&json!({
            "project": project,
            "output_directory": output,
            "threads": 2,
            "qc": { "min_precursor_sample": 10 },
        }))?,
    )?;

    let settings = Input::load(parameters.to_str().unwrap())?.build()?;
    let settings = Runner::new(settings).run()?;
    assert_eq!(settings.output_paths.len(), 4);

    let psms = std::fs::read_to_string(output.join("spectrum_matches.sieve.tsv"))?;
    let mut lines = psms.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("key\tfilename\tcharge\tlabel"));
    assert!(header.ends_with("sieve_score\tqc"));
    assert_eq!(lines.count(), 330);

    let best = psms.lines().nth(1).unwrap();
    assert!(best.starts_with("0\trun.mzML\t2\t1\t"));
    assert!(best.contains("\tconfident\t0\t"));

    let manual = psms.lines().find(|line| line.starts_with("299\t")).unwrap();
    assert!(manual.contains("\tconfident\t1\t"));

    let proteins = std::fs::read_to_string(output.join("protein_groups.sieve.tsv"))?;
    assert_eq!(proteins.lines().count(), 111);

    let results: serde_json::Value =
        serde_json::from_slice(&std::fs::read(output.join("results.json"))?)?;
    assert_eq!(results["validation"]["levels"]["spectrum"]["matches"], 330);
    assert_eq!(results["validation"]["levels"]["spectrum"]["frozen"], 1);
    assert_eq!(results["settings"]["parameters"]["threads"], 2);
    assert!(results["strata"]["spectrum"][0]["targets"].as_u64().unwrap() > 0);
    Ok(())
}

#[test]
fn missing_project_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let parameters = dir.path().join("parameters.json");
    std::fs::write(
        &parameters,
        serde_json::to_vec(&json!({
            "project": dir.path().join("missing.json"),
            "output_directory": dir.path(),
        }))?,
    )?;
    let settings = Input::load(parameters.to_str().unwrap())?.build()?;
    assert!(Runner::new(settings).run().is_err());
    Ok(())
}
