//! TB-022: Table storage seam.
//!
//! Physical storage lives outside this crate. A [`TableRepo`] stores one
//! table's rows per env; [`ContextTable`] binds a repo to a running stage so
//! reads see the read env and writes land in the write env.

use crate::error::Result;
use crate::pipeline::RunContext;
use std::path::PathBuf;

/// Storage for a single table, partitioned by env.
pub trait TableRepo {
    /// In-memory frame type the backend reads and writes.
    type Frame;

    fn get_full_dataframe(&self, env: &str) -> Result<Self::Frame>;

    fn replace_all(&mut self, df: Self::Frame, env: &str) -> Result<()>;

    /// Append rows. Fact tables only grow through this.
    fn extend(&mut self, df: Self::Frame, env: &str) -> Result<()>;

    /// Upsert rows by index of a keyed table.
    fn replace_records(&mut self, df: Self::Frame, env: &str) -> Result<()>;

    /// Prepare the backend for writes to `env`.
    fn set_environment(&mut self, env: &str) -> Result<()>;

    /// Paths of the partitions split on `column`.
    fn partition_paths(&self, column: &str, env: &str) -> Result<Vec<PathBuf>>;
}

/// A repo bound to the envs of a running stage.
pub struct ContextTable<'a, R: TableRepo> {
    repo: &'a mut R,
    read_env: &'a str,
    write_env: &'a str,
}

impl<'a, R: TableRepo> ContextTable<'a, R> {
    pub fn bind(repo: &'a mut R, ctx: &'a RunContext) -> Result<Self> {
        repo.set_environment(&ctx.write_env)?;
        Ok(Self {
            repo,
            read_env: &ctx.read_env,
            write_env: &ctx.write_env,
        })
    }

    pub fn get_full_dataframe(&self) -> Result<R::Frame> {
        self.repo.get_full_dataframe(self.read_env)
    }

    pub fn replace_all(&mut self, df: R::Frame) -> Result<()> {
        self.repo.replace_all(df, self.write_env)
    }

    pub fn extend(&mut self, df: R::Frame) -> Result<()> {
        self.repo.extend(df, self.write_env)
    }

    pub fn replace_records(&mut self, df: R::Frame) -> Result<()> {
        self.repo.replace_records(df, self.write_env)
    }

    pub fn partition_paths(&self, column: &str) -> Result<Vec<PathBuf>> {
        self.repo.partition_paths(column, self.read_env)
    }
}
