use crate::pipeline::CaseSummary;
use crate::types::{path_or_sentinel, RoleRecord};
use std::fmt;

/// Text summary of a processed case
pub struct CaseReport<'a> {
    summary: &'a CaseSummary,
}

impl<'a> CaseReport<'a> {
    /// Creates a new case report
    pub fn new(summary: &'a CaseSummary) -> Self {
        Self { summary }
    }
}

impl<'a> fmt::Display for CaseReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = &self.summary.bundle.info;
        let title = format!("Case {}", info.id);
        writeln!(f, "{}", title)?;
        writeln!(f, "{}", "=".repeat(title.len()))?;
        writeln!(f)?;
        writeln!(f, "Work Directory: {}", info.work_dir.display())?;
        writeln!(
            f,
            "Breast Mask:    {}",
            path_or_sentinel(info.mask_file.as_deref())
        )?;
        writeln!(
            f,
            "4D Stack:       {}",
            path_or_sentinel(self.summary.stack.as_deref())
        )?;
        writeln!(
            f,
            "Elapsed:        {:.2} minute(s)",
            self.summary.elapsed.as_secs_f64() / 60.0
        )?;
        writeln!(f)?;

        writeln!(f, "Roles")?;
        writeln!(f, "-----")?;
        for record in self.summary.bundle.iter() {
            write_role(f, record)?;
        }
        Ok(())
    }
}

fn write_role(f: &mut fmt::Formatter<'_>, record: &RoleRecord) -> fmt::Result {
    writeln!(f, "{}: {}", record.name, record.selection.label())?;
    if record.filename.is_none() {
        return Ok(());
    }
    writeln!(
        f,
        "  File:         {}",
        path_or_sentinel(record.filename.as_deref())
    )?;
    writeln!(f, "  Registration: {}", record.registration)?;
    if record.registration.is_registered() {
        writeln!(
            f,
            "  Registered:   {}",
            path_or_sentinel(record.filename_reg.as_deref())
        )?;
    }
    if let Some(normalized) = &record.filename_norm {
        writeln!(f, "  Normalized:   {}", normalized.display())?;
    } else if let Some(corrected) = &record.filename_bias {
        writeln!(f, "  Corrected:    {}", corrected.display())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CaseBundle, CaseInfo, MatchedSeries, RegistrationState, RoleSpec, Selection,
        SeriesHeader,
    };
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    #[test]
    fn test_case_report_format() {
        let mut bundle = CaseBundle::new(CaseInfo::from_dicom_dir(Path::new("/data/1001/study")));
        let mut t1 = RoleRecord::new("T1", RoleSpec::default());
        t1.selection = Selection::Matched(MatchedSeries {
            label: "AX T1 PRE [dir=00002]".to_string(),
            files: vec![],
            directory: PathBuf::from("/data/1001/study/00002"),
            header: SeriesHeader::default(),
        });
        t1.filename = Some(PathBuf::from("/data/1001/1001_T1.nii.gz"));
        t1.filename_reg = Some(PathBuf::from("/data/1001/1001_T1_w.nii.gz"));
        t1.registration = RegistrationState::Registered;
        t1.filename_norm = Some(PathBuf::from("/data/1001/1001_T1_wmtbn.nii.gz"));
        bundle.insert(t1);
        let mut flair = RoleRecord::new("FLAIR", RoleSpec::default());
        flair.selection = Selection::NoMatch;
        bundle.insert(flair);

        let summary = CaseSummary {
            bundle,
            stack: None,
            elapsed: Duration::from_secs(90),
        };
        let output = format!("{}", CaseReport::new(&summary));

        assert!(output.starts_with("Case 1001\n=========\n"));
        assert!(output.contains("Work Directory: /data/1001"));
        assert!(output.contains("Breast Mask:    None"));
        assert!(output.contains("Elapsed:        1.50 minute(s)"));
        assert!(output.contains("T1: AX T1 PRE [dir=00002]"));
        assert!(output.contains("  Registration: registered"));
        assert!(output.contains("  Registered:   /data/1001/1001_T1_w.nii.gz"));
        assert!(output.contains("  Normalized:   /data/1001/1001_T1_wmtbn.nii.gz"));
        assert!(output.contains("FLAIR: None\n"));
    }
}
