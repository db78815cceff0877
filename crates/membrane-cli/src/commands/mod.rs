pub mod check;
pub mod layout;
pub mod run;

pub trait MembraneCommand {
	fn run(self) -> anyhow::Result<()>;
}
