//! Job descriptor generation: template substitution, one YAML file per
//! query batch.

use crate::constants::{ELB_JOB_FILE_PREFIX, ELB_QUERY_BATCH_FILE_PREFIX};
use crate::error::Error;
use crate::filehelper::FileHelper;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Default Kubernetes job template used when the caller supplies none.
const DFLT_JOB_TEMPLATE: &str = r"apiVersion: batch/v1
kind: Job
metadata:
  name: blast-${QUERY_NUM}
  labels:
    app: blast
spec:
  backoffLimit: 3
  template:
    metadata:
      labels:
        app: blast
    spec:
      containers:
      - name: blast
        image: ${ELB_DOCKER_IMAGE}
        workingDir: /blast/blastdb
        command: ['run_blast.sh', '${ELB_BLAST_PROGRAM}', '${ELB_DB}', '${QUERY_PATH}', '${RESULTS}/${QUERY}.out.gz']
        resources:
          requests:
            memory: ${ELB_MEM_REQUEST}
            cpu: ${ELB_NUM_CPUS}
          limits:
            memory: ${ELB_MEM_LIMIT}
            cpu: ${ELB_NUM_CPUS}
      restartPolicy: Never
";

/// The job template shipped with the crate.
#[must_use]
pub fn read_job_template() -> &'static str {
    DFLT_JOB_TEMPLATE
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("valid regex"))
}

/// Substitute `$VAR` and `${VAR}` occurrences against `vars`. Unknown
/// variables are left verbatim.
#[must_use]
pub fn substitute_params(template: &str, vars: &HashMap<String, String>) -> String {
    var_pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            vars.get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Write one job descriptor per batch, named `job_NNN.yaml` after the
/// batch number, in batch order. Returns the job file URIs.
///
/// Substitutions always include `QUERY` (batch file stem), `QUERY_NUM`,
/// and `QUERY_PATH` (full batch URI); `extra` contributes the rest,
/// typically at least `RESULTS`.
pub fn write_job_files(
    filehelper: &mut FileHelper,
    job_path: &str,
    template: &str,
    batches: &[String],
    extra: &HashMap<String, String>,
) -> Result<Vec<String>, Error> {
    let job_path = job_path.trim_end_matches('/');
    let mut jobs = Vec::with_capacity(batches.len());

    for (index, batch) in batches.iter().enumerate() {
        let name = batch.rsplit('/').next().unwrap_or(batch);
        let stem = name.strip_suffix(".fa").unwrap_or(name);
        let num = stem
            .strip_prefix(ELB_QUERY_BATCH_FILE_PREFIX)
            .map_or_else(|| format!("{index:03}"), String::from);

        let mut vars = extra.clone();
        vars.insert("QUERY".to_string(), stem.to_string());
        vars.insert("QUERY_NUM".to_string(), num.clone());
        vars.insert("QUERY_PATH".to_string(), batch.clone());

        let uri = format!("{job_path}/{ELB_JOB_FILE_PREFIX}{num}.yaml");
        let staged = filehelper.open_for_write(&uri)?;
        std::fs::write(&staged, substitute_params(template, &vars))?;
        jobs.push(uri);
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_both_forms() {
        let map = vars(&[
            ("QUERY_NUM", "046"),
            ("QUERY_PATH", "gs://example-bucket/some_path"),
        ]);
        let text = "${QUERY_NUM}$QUERY_NUM\n${QUERY_PATH}\n${SOME_NON_EXISTING_VARIABLE}";
        assert_eq!(
            substitute_params(text, &map),
            "046046\ngs://example-bucket/some_path\n${SOME_NON_EXISTING_VARIABLE}"
        );
    }

    #[test]
    fn test_unknown_bare_variable_left_verbatim() {
        let map = vars(&[("RESULTS", "gs://results-bucket/results_path")]);
        let text = "${RESULTS}/results.aln\n$SOME_UNDEFINED_VARIABLE";
        assert_eq!(
            substitute_params(text, &map),
            "gs://results-bucket/results_path/results.aln\n$SOME_UNDEFINED_VARIABLE"
        );
    }

    #[test]
    fn test_default_template_has_program_variable() {
        assert!(read_job_template().contains("${ELB_BLAST_PROGRAM}"));
    }

    #[tokio::test]
    async fn test_write_job_files() {
        let dir = tempfile::tempdir().unwrap();
        let job_path = dir.path().join("jobs").display().to_string();
        let mut fh = crate::filehelper::FileHelper::new().unwrap();

        let template = "$QUERY_NUM\n${QUERY}\n$QUERY_PATH\n${RESULTS}/results.aln";
        let batches = vec!["gs://test-bucket/batch_046.fa".to_string()];
        let jobs = write_job_files(
            &mut fh,
            &job_path,
            template,
            &batches,
            &vars(&[("RESULTS", "gs://results-bucket/results_path")]),
        )
        .unwrap();
        fh.copy_to_bucket(false).await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].ends_with("job_046.yaml"));
        let text = std::fs::read_to_string(&jobs[0]).unwrap();
        assert_eq!(
            text,
            "046\nbatch_046\ngs://test-bucket/batch_046.fa\ngs://results-bucket/results_path/results.aln"
        );
    }

    #[tokio::test]
    async fn test_job_files_follow_batch_order() {
        let dir = tempfile::tempdir().unwrap();
        let job_path = dir.path().join("jobs").display().to_string();
        let mut fh = crate::filehelper::FileHelper::new().unwrap();

        let batches: Vec<String> = (0..5)
            .map(|i| format!("s3://bucket/batches/batch_{i:03}.fa"))
            .collect();
        let jobs = write_job_files(&mut fh, &job_path, "$QUERY", &batches, &HashMap::new())
            .unwrap();
        for (i, job) in jobs.iter().enumerate() {
            assert!(job.ends_with(&format!("job_{i:03}.yaml")));
        }
    }
}
