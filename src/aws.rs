//! AWS back-end: CloudFormation stack with an AWS Batch compute
//! environment, job queue, and job definition; one Batch job per query
//! batch; search state split between S3 metadata and Batch job states.

use crate::cleanup::CleanupStack;
use crate::config::ElasticBlastConfig;
use crate::constants::{
    ELB_BILLING_LABEL_KEY, ELB_BILLING_LABEL_VALUE, ELB_CLUSTER_NAME_LABEL_KEY,
    ELB_CREATED_BY_LABEL_KEY, ELB_JOB_IDS_FILE,
};
use crate::elasticblast::{
    check_markers, check_ownership, ElasticBlast, JobFile, Ownership, StatusReport,
};
use crate::error::Error;
use crate::filehelper::{metadata_uri, FileHelper};
use crate::resilience::{execute_with_retry, with_timeout, RetryConfig};
use crate::status::{ElbStatus, JobCounts};
use async_trait::async_trait;
use aws_sdk_batch::types::{ContainerOverrides, JobStatus, KeyValuePair};
use aws_sdk_cloudformation::types::{Capability, OnFailure, Parameter, StackStatus, Tag};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Self-contained CloudFormation template: networking, IAM, a managed
/// Batch compute environment, a job queue, and the BLAST job definition.
const ELB_AWS_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: ElasticBLAST compute environment, job queue, and job definition
Parameters:
  MachineType:
    Type: String
  MaxVcpus:
    Type: Number
  UseSpotInstances:
    Type: String
    AllowedValues: ['true', 'false']
    Default: 'false'
  JobVcpus:
    Type: Number
    Default: 16
  JobMemoryMiB:
    Type: Number
    Default: 20480
  DockerImage:
    Type: String
    Default: 'ncbi/elasticblast-elb'
Conditions:
  UseSpot: !Equals [!Ref UseSpotInstances, 'true']
Resources:
  Vpc:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: 10.0.0.0/16
      EnableDnsSupport: true
      EnableDnsHostnames: true
  InternetGateway:
    Type: AWS::EC2::InternetGateway
  GatewayAttachment:
    Type: AWS::EC2::VPCGatewayAttachment
    Properties:
      VpcId: !Ref Vpc
      InternetGatewayId: !Ref InternetGateway
  Subnet:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref Vpc
      CidrBlock: 10.0.0.0/18
      MapPublicIpOnLaunch: true
  RouteTable:
    Type: AWS::EC2::RouteTable
    Properties:
      VpcId: !Ref Vpc
  DefaultRoute:
    Type: AWS::EC2::Route
    DependsOn: GatewayAttachment
    Properties:
      RouteTableId: !Ref RouteTable
      DestinationCidrBlock: 0.0.0.0/0
      GatewayId: !Ref InternetGateway
  SubnetRouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref Subnet
      RouteTableId: !Ref RouteTable
  SecurityGroup:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: ElasticBLAST worker nodes
      VpcId: !Ref Vpc
  BatchServiceRole:
    Type: AWS::IAM::Role
    Properties:
      AssumeRolePolicyDocument:
        Version: '2012-10-17'
        Statement:
          - Effect: Allow
            Principal: {Service: batch.amazonaws.com}
            Action: sts:AssumeRole
      ManagedPolicyArns:
        - arn:aws:iam::aws:policy/service-role/AWSBatchServiceRole
  EcsInstanceRole:
    Type: AWS::IAM::Role
    Properties:
      AssumeRolePolicyDocument:
        Version: '2012-10-17'
        Statement:
          - Effect: Allow
            Principal: {Service: ec2.amazonaws.com}
            Action: sts:AssumeRole
      ManagedPolicyArns:
        - arn:aws:iam::aws:policy/service-role/AmazonEC2ContainerServiceforEC2Role
        - arn:aws:iam::aws:policy/AmazonS3FullAccess
  EcsInstanceProfile:
    Type: AWS::IAM::InstanceProfile
    Properties:
      Roles: [!Ref EcsInstanceRole]
  ComputeEnvironment:
    Type: AWS::Batch::ComputeEnvironment
    Properties:
      Type: MANAGED
      ServiceRole: !GetAtt BatchServiceRole.Arn
      ComputeResources:
        Type: !If [UseSpot, SPOT, EC2]
        MinvCpus: 0
        MaxvCpus: !Ref MaxVcpus
        InstanceTypes: [!Ref MachineType]
        Subnets: [!Ref Subnet]
        SecurityGroupIds: [!Ref SecurityGroup]
        InstanceRole: !Ref EcsInstanceProfile
  JobQueue:
    Type: AWS::Batch::JobQueue
    Properties:
      Priority: 1
      ComputeEnvironmentOrder:
        - Order: 1
          ComputeEnvironment: !Ref ComputeEnvironment
  JobDefinition:
    Type: AWS::Batch::JobDefinition
    Properties:
      Type: container
      RetryStrategy:
        Attempts: 3
      ContainerProperties:
        Image: !Ref DockerImage
        Vcpus: !Ref JobVcpus
        Memory: !Ref JobMemoryMiB
        Command: ['run_blast.sh']
Outputs:
  JobQueueName:
    Value: !Ref JobQueue
  JobDefinitionName:
    Value: !Ref JobDefinition
  ComputeEnvironmentName:
    Value: !Ref ComputeEnvironment
"#;

const STACK_POLL_INTERVAL_SECS: u64 = 10;
const STACK_POLL_MAX_ATTEMPTS: u32 = 180;

/// Derive the lifecycle state from job counters alone, once the stack is
/// known to be up.
fn aggregate_status(counts: JobCounts) -> ElbStatus {
    if counts.failed > 0 {
        ElbStatus::Failure
    } else if counts.total() > 0 && counts.succeeded == counts.total() {
        ElbStatus::Success
    } else if counts.pending + counts.running > 0 {
        ElbStatus::Running
    } else {
        ElbStatus::Submitting
    }
}

/// Map an AWS SDK failure into the error taxonomy by its error code.
fn classify_aws<E: std::fmt::Debug>(operation: &str, err: &E) -> Error {
    let text = format!("{err:?}");
    if text.contains("Throttling")
        || text.contains("TooManyRequests")
        || text.contains("RequestTimeout")
        || text.contains("ServiceUnavailable")
        || text.contains("DispatchFailure")
        || text.contains("TimeoutError")
    {
        Error::transient(format!("{operation} failed: {text}"))
    } else if text.contains("AccessDenied")
        || text.contains("UnrecognizedClient")
        || text.contains("ExpiredToken")
        || text.contains("InvalidClientTokenId")
    {
        Error::permission(format!("{operation} was rejected: {text}"))
    } else {
        Error::cluster(format!("{operation} failed: {text}"))
    }
}

fn stack_does_not_exist<E: std::fmt::Debug>(err: &E) -> bool {
    format!("{err:?}").contains("does not exist")
}

pub struct ElasticBlastAws {
    cfg: ElasticBlastConfig,
    filehelper: FileHelper,
    batch: aws_sdk_batch::Client,
    cfn: aws_sdk_cloudformation::Client,
    retry: RetryConfig,
}

impl ElasticBlastAws {
    pub async fn new(cfg: ElasticBlastConfig) -> Result<Self, Error> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.cloud.region.clone()));
        if let Some(profile) = &cfg.cloud.credentials {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;
        Ok(Self {
            cfg,
            filehelper: FileHelper::new()?,
            batch: aws_sdk_batch::Client::new(&sdk_config),
            cfn: aws_sdk_cloudformation::Client::new(&sdk_config),
            retry: RetryConfig::default(),
        })
    }

    fn stack_name(&self) -> &str {
        &self.cfg.cluster.name
    }

    async fn stack_status(&self) -> Result<Option<StackStatus>, Error> {
        let result = with_timeout("describe stack", async {
            self.cfn
                .describe_stacks()
                .stack_name(self.stack_name())
                .send()
                .await
                .map_err(|e| {
                    if stack_does_not_exist(&e) {
                        Error::not_found(self.stack_name().to_string())
                    } else {
                        classify_aws("describe stack", &e)
                    }
                })
        })
        .await;
        match result {
            Ok(output) => Ok(output
                .stacks()
                .first()
                .and_then(|s| s.stack_status().cloned())),
            Err(Error::Report { kind, .. }) if kind == crate::error::ErrorKind::Input => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn stack_output(&self, key: &str) -> Result<String, Error> {
        let output = with_timeout("describe stack", async {
            self.cfn
                .describe_stacks()
                .stack_name(self.stack_name())
                .send()
                .await
                .map_err(|e| classify_aws("describe stack", &e))
        })
        .await?;
        output
            .stacks()
            .first()
            .and_then(|s| {
                s.outputs()
                    .iter()
                    .find(|o| o.output_key() == Some(key))
                    .and_then(|o| o.output_value())
            })
            .map(String::from)
            .ok_or_else(|| {
                Error::cluster(format!(
                    "stack {} has no output '{key}'",
                    self.stack_name()
                ))
            })
    }

    async fn wait_for_stack(&self, target: StackStatus, allow_gone: bool) -> Result<(), Error> {
        for _ in 0..STACK_POLL_MAX_ATTEMPTS {
            match self.stack_status().await? {
                None if allow_gone => return Ok(()),
                None => {
                    return Err(Error::cluster(format!(
                        "stack {} disappeared while waiting for {target:?}",
                        self.stack_name()
                    )))
                }
                Some(status) if status == target => return Ok(()),
                Some(StackStatus::CreateFailed | StackStatus::RollbackComplete)
                    if target == StackStatus::CreateComplete =>
                {
                    return Err(Error::cluster(format!(
                        "stack {} failed to create; check the CloudFormation console",
                        self.stack_name()
                    )))
                }
                Some(status) => {
                    debug!("stack {} is {status:?}", self.stack_name());
                }
            }
            tokio::time::sleep(Duration::from_secs(STACK_POLL_INTERVAL_SECS)).await;
        }
        Err(Error::cluster(format!(
            "timed out waiting for stack {} to reach {target:?}",
            self.stack_name()
        )))
    }

    /// Batch job ids recorded at submit time, if any.
    async fn load_job_ids(&self) -> Result<Vec<String>, Error> {
        let uri = metadata_uri(self.cfg.results(), ELB_JOB_IDS_FILE);
        if !self.filehelper.exists(&uri).await? {
            return Ok(Vec::new());
        }
        let bytes = self.filehelper.get_bytes(&uri).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn count_jobs(
        &self,
        job_ids: &[String],
    ) -> Result<(JobCounts, BTreeMap<String, String>), Error> {
        let mut counts = JobCounts::default();
        let mut details = BTreeMap::new();
        for chunk in job_ids.chunks(100) {
            let output = with_timeout("describe jobs", async {
                self.batch
                    .describe_jobs()
                    .set_jobs(Some(chunk.to_vec()))
                    .send()
                    .await
                    .map_err(|e| classify_aws("describe jobs", &e))
            })
            .await?;
            for job in output.jobs() {
                match job.status() {
                    Some(JobStatus::Submitted | JobStatus::Pending | JobStatus::Runnable) => {
                        counts.pending += 1;
                    }
                    Some(JobStatus::Starting | JobStatus::Running) => counts.running += 1,
                    Some(JobStatus::Succeeded) => counts.succeeded += 1,
                    Some(JobStatus::Failed) => {
                        counts.failed += 1;
                        if let (Some(id), Some(reason)) = (job.job_id(), job.status_reason()) {
                            details.insert(id.to_string(), reason.to_string());
                        }
                    }
                    _ => counts.pending += 1,
                }
            }
        }
        Ok((counts, details))
    }
}

#[async_trait]
impl ElasticBlast for ElasticBlastAws {
    fn config(&self) -> &ElasticBlastConfig {
        &self.cfg
    }

    fn dry_run(&self) -> bool {
        self.cfg.cluster.dry_run
    }

    async fn provision(&mut self, cleanup: &mut CleanupStack) -> Result<(), Error> {
        if check_ownership(&self.filehelper, &self.cfg).await? == Ownership::Reattach
            && self.stack_status().await?.is_some()
        {
            info!("reattaching to existing cluster {}", self.stack_name());
            return Ok(());
        }
        if self.dry_run() {
            info!("dry-run: would create stack {}", self.stack_name());
            return Ok(());
        }

        let machine_type = self
            .cfg
            .cluster
            .machine_type
            .clone()
            .unwrap_or_else(|| "m5.8xlarge".to_string());
        let job_vcpus = self.cfg.cluster.num_cpus.map_or(16, |n| n.get());
        let max_vcpus = job_vcpus * self.cfg.cluster.num_nodes.get();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let job_memory_mib = (self.cfg.blast.mem_limit.as_gb() * 1024.0) as u64;
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());

        info!("creating stack {}", self.stack_name());
        let create = self
            .cfn
            .create_stack()
            .stack_name(self.stack_name())
            .template_body(ELB_AWS_TEMPLATE)
            .on_failure(OnFailure::Delete)
            .capabilities(Capability::CapabilityIam)
            .parameters(param("MachineType", &machine_type))
            .parameters(param("MaxVcpus", &max_vcpus.to_string()))
            .parameters(param(
                "UseSpotInstances",
                if self.cfg.cluster.use_preemptible {
                    "true"
                } else {
                    "false"
                },
            ))
            .parameters(param("JobVcpus", &job_vcpus.to_string()))
            .parameters(param("JobMemoryMiB", &job_memory_mib.to_string()))
            .tags(tag(ELB_BILLING_LABEL_KEY, ELB_BILLING_LABEL_VALUE))
            .tags(tag(ELB_CLUSTER_NAME_LABEL_KEY, self.stack_name()))
            .tags(tag(ELB_CREATED_BY_LABEL_KEY, &user));

        execute_with_retry(&self.retry, "create stack", || {
            let create = create.clone();
            async move {
                with_timeout("create stack", async {
                    create
                        .send()
                        .await
                        .map(|_| ())
                        .map_err(|e| classify_aws("create stack", &e))
                })
                .await
            }
        })
        .await?;

        let cfn = self.cfn.clone();
        let stack_name = self.stack_name().to_string();
        cleanup.push("delete CloudFormation stack", move || async move {
            cfn.delete_stack()
                .stack_name(&stack_name)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_aws("delete stack", &e))
        });

        self.wait_for_stack(StackStatus::CreateComplete, false).await
    }

    async fn submit_jobs(&mut self, batches: &[String], _jobs: &[JobFile]) -> Result<(), Error> {
        if self.dry_run() {
            info!("dry-run: would submit {} jobs", batches.len());
            return Ok(());
        }
        let queue = self.stack_output("JobQueueName").await?;
        let job_definition = self.stack_output("JobDefinitionName").await?;
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());

        let mut job_ids = Vec::with_capacity(batches.len());
        for batch in batches {
            let stem = batch
                .rsplit('/')
                .next()
                .and_then(|n| n.strip_suffix(".fa"))
                .unwrap_or("batch");
            let job_name = format!("{}-{stem}", self.stack_name());

            let overrides = ContainerOverrides::builder()
                .environment(env_var("ELB_QUERY", batch))
                .environment(env_var("ELB_RESULTS", self.cfg.results()))
                .environment(env_var("ELB_DB", &self.cfg.blast.db))
                .environment(env_var(
                    "ELB_BLAST_PROGRAM",
                    self.cfg.blast.program.as_str(),
                ))
                .environment(env_var("ELB_BLAST_OPTIONS", &self.cfg.blast.options))
                .environment(env_var("ELB_MEM_LIMIT", self.cfg.blast.mem_limit.as_str()))
                .build();

            let submit = self
                .batch
                .submit_job()
                .job_name(&job_name)
                .job_queue(&queue)
                .job_definition(&job_definition)
                .container_overrides(overrides)
                .tags(ELB_BILLING_LABEL_KEY, ELB_BILLING_LABEL_VALUE)
                .tags(ELB_CLUSTER_NAME_LABEL_KEY, self.stack_name())
                .tags(ELB_CREATED_BY_LABEL_KEY, &user);

            let job_id = execute_with_retry(&self.retry, "submit job", || {
                let submit = submit.clone();
                async move {
                    with_timeout("submit job", async {
                        let response = submit
                            .send()
                            .await
                            .map_err(|e| classify_aws("submit job", &e))?;
                        response.job_id().map(String::from).ok_or_else(|| {
                            Error::internal("Batch accepted a job without returning an id")
                        })
                    })
                    .await
                }
            })
            .await?;
            debug!("submitted {job_name} as {job_id}");
            job_ids.push(job_id);
        }

        let uri = metadata_uri(self.cfg.results(), ELB_JOB_IDS_FILE);
        self.filehelper
            .put_bytes(&uri, &serde_json::to_vec(&job_ids)?)
            .await?;
        info!("submitted {} jobs to queue {queue}", job_ids.len());
        Ok(())
    }

    async fn check_status(&self) -> Result<StatusReport, Error> {
        if let Some(terminal) = check_markers(&self.filehelper, self.cfg.results()).await? {
            return Ok(StatusReport::bare(terminal));
        }
        if self.dry_run() {
            return Ok(StatusReport::bare(ElbStatus::Unknown));
        }

        match self.stack_status().await? {
            None => return Ok(StatusReport::bare(ElbStatus::Unknown)),
            Some(StackStatus::CreateInProgress) => {
                return Ok(StatusReport::bare(ElbStatus::Creating))
            }
            Some(StackStatus::DeleteInProgress) => {
                return Ok(StatusReport::bare(ElbStatus::Deleting))
            }
            Some(
                StackStatus::CreateFailed
                | StackStatus::RollbackComplete
                | StackStatus::RollbackInProgress,
            ) => {
                let mut report = StatusReport::bare(ElbStatus::Failure);
                report
                    .details
                    .insert("stack".to_string(), "cluster creation failed".to_string());
                return Ok(report);
            }
            Some(_) => {}
        }

        let job_ids = self.load_job_ids().await?;
        if job_ids.is_empty() {
            return Ok(StatusReport::bare(ElbStatus::Submitting));
        }
        let (counts, details) = self.count_jobs(&job_ids).await?;
        Ok(StatusReport {
            status: aggregate_status(counts),
            counts,
            details,
        })
    }

    async fn delete(&self) -> Result<(), Error> {
        if self.dry_run() {
            info!("dry-run: would delete stack {}", self.stack_name());
            return Ok(());
        }

        // Outstanding jobs first so the compute environment can drain
        match self.load_job_ids().await {
            Ok(job_ids) => {
                for job_id in job_ids {
                    let result = with_timeout("terminate job", async {
                        self.batch
                            .terminate_job()
                            .job_id(&job_id)
                            .reason("ElasticBLAST search deleted")
                            .send()
                            .await
                            .map(|_| ())
                            .map_err(|e| classify_aws("terminate job", &e))
                    })
                    .await;
                    if let Err(e) = result {
                        warn!("could not terminate job {job_id}: {e}");
                    }
                }
            }
            Err(e) => warn!("could not read job ids for termination: {e}"),
        }

        let result = with_timeout("delete stack", async {
            self.cfn
                .delete_stack()
                .stack_name(self.stack_name())
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_aws("delete stack", &e))
        })
        .await;
        match result {
            Ok(()) => {}
            Err(e) if stack_does_not_exist(&e) => {
                info!("stack {} is already gone", self.stack_name());
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.wait_for_stack(StackStatus::DeleteComplete, true).await
    }
}

fn param(key: &str, value: &str) -> Parameter {
    Parameter::builder()
        .parameter_key(key)
        .parameter_value(value)
        .build()
}

fn tag(key: &str, value: &str) -> Tag {
    Tag::builder().key(key).value(value).build()
}

fn env_var(name: &str, value: &str) -> KeyValuePair {
    KeyValuePair::builder().name(name).value(value).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_status() {
        let mk = |pending, running, succeeded, failed| JobCounts {
            pending,
            running,
            succeeded,
            failed,
        };
        assert_eq!(aggregate_status(mk(0, 0, 0, 1)), ElbStatus::Failure);
        // Any failure wins even with work in flight
        assert_eq!(aggregate_status(mk(2, 3, 1, 1)), ElbStatus::Failure);
        assert_eq!(aggregate_status(mk(0, 0, 5, 0)), ElbStatus::Success);
        assert_eq!(aggregate_status(mk(1, 0, 4, 0)), ElbStatus::Running);
        assert_eq!(aggregate_status(mk(0, 2, 0, 0)), ElbStatus::Running);
        assert_eq!(aggregate_status(mk(0, 0, 0, 0)), ElbStatus::Submitting);
    }

    #[test]
    fn test_template_declares_batch_resources() {
        for needle in [
            "AWS::Batch::ComputeEnvironment",
            "AWS::Batch::JobQueue",
            "AWS::Batch::JobDefinition",
            "JobQueueName",
            "JobDefinitionName",
        ] {
            assert!(ELB_AWS_TEMPLATE.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn test_template_is_valid_yaml() {
        let parsed: serde_yaml::Value = serde_yaml::from_str(ELB_AWS_TEMPLATE).unwrap();
        assert!(parsed.get("Resources").is_some());
        assert!(parsed.get("Outputs").is_some());
    }

    #[test]
    fn test_classify_aws_errors() {
        assert!(classify_aws("op", &"ThrottlingException: slow down").is_transient());
        assert_eq!(
            classify_aws("op", &"AccessDenied: nope").kind(),
            crate::error::ErrorKind::Permission
        );
        assert_eq!(
            classify_aws("op", &"something else").kind(),
            crate::error::ErrorKind::Cluster
        );
    }
}
