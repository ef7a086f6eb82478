//! SQL jobs

use taskline_core::domain::job::{JobType, SqlJobSpec};
use taskline_core::domain::task::{JobTask, JobTaskSqlSpec, JobTaskSpec};

use super::{CompileCtx, CompileResult, Required};

pub(crate) fn merge_args(spec: &mut SqlJobSpec, args: &SqlJobSpec) {
    spec.sql = args.sql.clone();
    if !args.db_instance_id.is_empty() {
        spec.db_instance_id = args.db_instance_id.clone();
    }
}

pub(crate) async fn to_jobs(ctx: &CompileCtx<'_>, spec: &SqlJobSpec) -> CompileResult<Vec<JobTask>> {
    let instance = ctx
        .catalog
        .db_instance(&spec.db_instance_id)
        .await?
        .required("database instance", &spec.db_instance_id)?;

    let task = JobTask::new(
        ctx.job_name,
        ctx.job_name,
        JobType::Sql,
        JobTaskSpec::Sql(JobTaskSqlSpec {
            db_instance_id: spec.db_instance_id.clone(),
            db_type: instance.db_type,
            sql: spec.sql.clone(),
            results: Vec::new(),
        }),
    );
    Ok(vec![task])
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::catalog::{CatalogKind, DbInstance, DbType};
    use taskline_core::domain::job::JobSpec;
    use taskline_core::domain::workflow::Job;

    use crate::compiler::CompileError;
    use crate::compiler::tests::{compiler_for, put, seeded_store, workflow};

    #[tokio::test]
    async fn test_sql_job_carries_instance_type() {
        let store = seeded_store().await;
        put(
            &store,
            CatalogKind::DbInstance,
            "orders-db",
            &DbInstance {
                id: "orders-db".to_string(),
                name: "orders".to_string(),
                db_type: DbType::Mysql,
                host: "127.0.0.1".to_string(),
                port: 3306,
                username: "root".to_string(),
                password: "secret".to_string(),
            },
        )
        .await;
        let compiler = compiler_for(store);
        let job = Job::new(
            "migrate",
            JobSpec::Sql(SqlJobSpec {
                db_instance_id: "orders-db".to_string(),
                sql: "ALTER TABLE orders ADD note TEXT;".to_string(),
            }),
        );
        let wf = workflow(vec![vec![job.clone()]]);

        let tasks = compiler.to_jobs(&job, &wf, 1).await.unwrap();

        let JobTaskSpec::Sql(spec) = &tasks[0].spec else {
            panic!("sql spec expected");
        };
        assert_eq!(spec.db_type, DbType::Mysql);
        assert!(spec.results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_instance_fails() {
        let compiler = compiler_for(seeded_store().await);
        let job = Job::new(
            "migrate",
            JobSpec::Sql(SqlJobSpec {
                db_instance_id: "nope".to_string(),
                sql: "SELECT 1".to_string(),
            }),
        );
        let wf = workflow(vec![vec![job.clone()]]);

        let err = compiler.to_jobs(&job, &wf, 1).await.unwrap_err();
        assert!(matches!(err, CompileError::NotFound { kind: "database instance", .. }));
    }
}
