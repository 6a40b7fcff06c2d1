use anyhow::Result;

pub mod check;
pub mod config;
pub mod serve;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}
