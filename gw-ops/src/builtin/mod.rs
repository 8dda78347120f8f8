//! Built-in operations shipped with the agent, grounded in
//! `examples/original_source/redpepper/operations/{echo,command,file,service,package}.py`.

mod command;
mod echo;
mod file;
mod package;
mod service;

use crate::operation::OperationRegistry;

pub fn register_all(registry: &mut OperationRegistry) {
    echo::register(registry);
    command::register(registry);
    file::register(registry);
    service::register(registry);
    package::register(registry);
}
