pub mod aerogpu_cmd;
pub mod aerogpu_pci;
pub mod cmd_writer;
