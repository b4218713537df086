use crate::runner::Runner;
use sieve_core::matches::{MatchKey, MatchLevel, MatchStore, MatchValidation, QcResults};
use std::path::Path;

/// `name=true;other=false`
fn format_qc(qc: &QcResults) -> String {
    qc.iter()
        .map(|(name, passed)| format!("{}={}", name, passed))
        .collect::<Vec<_>>()
        .join(";")
}

fn label(decoy: bool) -> i32 {
    match decoy {
        true => -1,
        false => 1,
    }
}

fn push_validation(record: &mut csv::ByteRecord, validation: &MatchValidation) {
    record.push_field(validation.level.to_string().as_bytes());
    record.push_field(if validation.manual { b"1" } else { b"0" });
    record.push_field(ryu::Buffer::new().format(validation.confidence).as_bytes());
    record.push_field(ryu::Buffer::new().format(validation.probability).as_bytes());
    record.push_field(ryu::Buffer::new().format(validation.score).as_bytes());
    record.push_field(format_qc(&validation.qc).as_bytes());
}

const VALIDATION_HEADERS: [&str; 6] = [
    "validation",
    "manual",
    "confidence",
    "posterior_error",
    "sieve_score",
    "qc",
];

fn write_records(path: &Path, headers: Vec<&str>, records: Vec<csv::ByteRecord>) -> anyhow::Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(vec![]);

    let mut headers = csv::ByteRecord::from(headers);
    headers.extend(VALIDATION_HEADERS);
    wtr.write_byte_record(&headers)?;
    for record in records {
        wtr.write_byte_record(&record)?;
    }

    wtr.flush()?;
    let bytes = wtr.into_inner()?;
    std::fs::write(path, bytes)?;
    Ok(path.display().to_string())
}

impl Runner {
    fn validation(store: &dyn MatchStore, level: MatchLevel, key: MatchKey) -> MatchValidation {
        store.validation(level, key).unwrap_or_default()
    }

    pub fn write_spectrum_matches(&self, store: &dyn MatchStore) -> anyhow::Result<String> {
        let path = self.make_path("spectrum_matches.sieve.tsv");
        let records = store
            .keys(MatchLevel::Spectrum)
            .into_iter()
            .filter_map(|key| store.spectrum_match(key))
            .map(|psm| {
                let mut record = csv::ByteRecord::new();
                record.push_field(itoa::Buffer::new().format(psm.key.0).as_bytes());
                record.push_field(psm.spectrum_file.as_bytes());
                record.push_field(itoa::Buffer::new().format(psm.charge).as_bytes());
                record.push_field(itoa::Buffer::new().format(label(psm.decoy)).as_bytes());
                record.push_field(ryu::Buffer::new().format(psm.score).as_bytes());
                record.push_field(ryu::Buffer::new().format(psm.precursor_error()).as_bytes());
                record.push_field(psm.algorithms.join(";").as_bytes());
                push_validation(&mut record, &Self::validation(store, MatchLevel::Spectrum, psm.key));
                record
            })
            .collect::<Vec<_>>();

        write_records(
            &path,
            vec![
                "key",
                "filename",
                "charge",
                "label",
                "raw_score",
                "precursor_ppm",
                "algorithms",
            ],
            records,
        )
    }

    pub fn write_peptides(&self, store: &dyn MatchStore) -> anyhow::Result<String> {
        let path = self.make_path("peptides.sieve.tsv");
        let records = store
            .keys(MatchLevel::Peptide)
            .into_iter()
            .filter_map(|key| store.peptide_match(key))
            .map(|peptide| {
                let mut record = csv::ByteRecord::new();
                record.push_field(itoa::Buffer::new().format(peptide.key.0).as_bytes());
                record.push_field(peptide.sequence.as_bytes());
                record.push_field(peptide.proteins.join(";").as_bytes());
                record.push_field(itoa::Buffer::new().format(peptide.proteins.len()).as_bytes());
                record.push_field(itoa::Buffer::new().format(label(peptide.decoy)).as_bytes());
                record.push_field(
                    itoa::Buffer::new()
                        .format(peptide.spectrum_matches.len())
                        .as_bytes(),
                );
                push_validation(&mut record, &Self::validation(store, MatchLevel::Peptide, peptide.key));
                record
            })
            .collect::<Vec<_>>();

        write_records(
            &path,
            vec![
                "key",
                "peptide",
                "proteins",
                "num_proteins",
                "label",
                "spectrum_matches",
            ],
            records,
        )
    }

    pub fn write_protein_groups(&self, store: &dyn MatchStore) -> anyhow::Result<String> {
        let path = self.make_path("protein_groups.sieve.tsv");
        let records = store
            .keys(MatchLevel::Protein)
            .into_iter()
            .filter_map(|key| store.protein_group(key))
            .map(|group| {
                let accessions = group.accessions.iter().map(String::as_str).collect::<Vec<_>>();
                let mut record = csv::ByteRecord::new();
                record.push_field(itoa::Buffer::new().format(group.key.0).as_bytes());
                record.push_field(group.leading_accession.as_bytes());
                record.push_field(accessions.join(";").as_bytes());
                record.push_field(itoa::Buffer::new().format(label(group.decoy)).as_bytes());
                record.push_field(itoa::Buffer::new().format(group.peptides.len()).as_bytes());
                push_validation(&mut record, &Self::validation(store, MatchLevel::Protein, group.key));
                record
            })
            .collect::<Vec<_>>();

        write_records(
            &path,
            vec!["key", "leading_accession", "accessions", "label", "peptides"],
            records,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn qc_results_are_joined() {
        let mut qc = QcResults::new();
        assert_eq!(format_qc(&qc), "");
        qc.insert("validated_spectra".into(), true);
        qc.insert("precursor_deviation".into(), false);
        assert_eq!(format_qc(&qc), "precursor_deviation=false;validated_spectra=true");
    }

    #[test]
    fn validation_fields() {
        let mut record = csv::ByteRecord::new();
        push_validation(&mut record, &MatchValidation::default());
        assert_eq!(record.len(), VALIDATION_HEADERS.len());
        assert_eq!(&record[0], b"none");
        assert_eq!(&record[3], b"1.0");
    }
}
