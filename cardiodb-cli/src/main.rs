//! cardiodb 运维命令行

use anyhow::{bail, Context, Result};
use bson::oid::ObjectId;
use cardiodb_core::utils::pretty_documents;
use cardiodb_core::{DemographicsUpdate, Gender, OriginLocation, SeriesKey};
use cardiodb_database::{DatabasePool, DatabaseQueries, Profile, Settings};
use cardiodb_ingest::{PatientUploader, UploadSelection};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "cardiodb")]
#[command(about = "心脏建模患者数据库运维工具")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 数据库环境 (dev, deploy, inmemory)
    #[arg(short, long, default_value = "dev")]
    profile: Profile,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 列出所有患者的 internal_id 与序列
    Patients,

    /// 显示单个患者记录
    ShowPatient {
        internal_id: i64,
        /// 序列，最多两个
        #[arg(long)]
        series: Vec<String>,
    },

    /// 从目录树导入患者
    Upload {
        /// JSON 根目录
        root: PathBuf,
        /// 按序列导入，格式为 ID:SERIES
        #[arg(long = "patient", value_parser = parse_patient_series, conflicts_with = "internal_ids")]
        patients: Vec<(i64, String)>,
        /// 按 internal_id 导入
        #[arg(long = "internal-id")]
        internal_ids: Vec<i64>,
        /// 导入后加入的队列ID
        #[arg(long)]
        cohort: Option<String>,
    },

    /// 根据全部成员重新计算队列身高体重范围
    CohortRecompute { cohort_id: String },

    /// 更新患者人口学信息
    UpdateDemographics {
        internal_id: i64,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        gender: Option<Gender>,
        /// 身高 [cm]
        #[arg(long)]
        height: Option<f64>,
        /// 体重 [kg]
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        location: Option<OriginLocation>,
    },
}

fn parse_patient_series(value: &str) -> std::result::Result<(i64, String), String> {
    let (id, series) = value
        .split_once(':')
        .ok_or_else(|| format!("expected ID:SERIES, got '{}'", value))?;
    let id = id
        .parse::<i64>()
        .map_err(|e| format!("invalid internal id '{}': {}", id, e))?;
    Ok((id, series.to_string()))
}

fn series_key(series: Vec<String>) -> Result<Option<SeriesKey>> {
    let mut series = series.into_iter();
    match (series.next(), series.next(), series.next()) {
        (None, _, _) => Ok(None),
        (Some(a), None, _) => Ok(Some(SeriesKey::Single(a))),
        (Some(a), Some(b), None) => Ok(Some(SeriesKey::Pair(a, b))),
        _ => bail!("a patient has at most two series"),
    }
}

fn parse_object_id(value: &str) -> Result<ObjectId> {
    ObjectId::parse_str(value).with_context(|| format!("invalid object id '{}'", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let settings = Settings::load(args.config.as_deref()).context("loading configuration")?;
    info!("Using database '{}' (profile: {})", settings.database, args.profile);

    let pool = DatabasePool::connect(&settings, args.profile).await?;
    let queries = DatabaseQueries::new(&pool);

    match args.command {
        Command::Patients => {
            for (internal_id, series) in queries.list_patients().await? {
                match series {
                    Some(series) => println!("{:05}\t{}", internal_id, series),
                    None => println!("{:05}\t-", internal_id),
                }
            }
        }
        Command::ShowPatient {
            internal_id,
            series,
        } => {
            let series = series_key(series)?;
            let patient = queries.get_patient(internal_id, series.as_ref()).await?;
            println!("{}", pretty_documents(&[patient.document]));
        }
        Command::Upload {
            root,
            patients,
            internal_ids,
            cohort,
        } => {
            let selection = if patients.is_empty() {
                UploadSelection::InternalIds(internal_ids)
            } else {
                UploadSelection::Series(
                    patients
                        .into_iter()
                        .map(|(id, series)| (id, SeriesKey::Single(series)))
                        .collect(),
                )
            };

            let uploader = PatientUploader::new(&pool, root);
            match cohort {
                Some(cohort_id) => {
                    let cohort_id = parse_object_id(&cohort_id)?;
                    let cohort = uploader
                        .upload_patients_to_cohort(&cohort_id, &selection)
                        .await?;
                    info!(
                        "Cohort {} now has {} patients",
                        cohort.id, cohort.number_patients
                    );
                    println!("{}", pretty_documents(&[cohort.document]));
                }
                None => {
                    for id in uploader.upload_patients(&selection).await? {
                        println!("{}", id);
                    }
                }
            }
        }
        Command::CohortRecompute { cohort_id } => {
            let cohort_id = parse_object_id(&cohort_id)?;
            let cohort = queries.recompute_cohort_dimensions(&cohort_id).await?;
            println!("{}", pretty_documents(&[cohort.document]));
        }
        Command::UpdateDemographics {
            internal_id,
            age,
            gender,
            height,
            weight,
            location,
        } => {
            let update = DemographicsUpdate {
                age,
                gender,
                height,
                weight,
                origin_location: location,
            };
            if update.is_empty() {
                bail!("nothing to update");
            }
            let matched = queries.update_demographics(internal_id, &update).await?;
            info!("Updated {} record(s) of patient {}", matched, internal_id);
        }
    }

    Ok(())
}
