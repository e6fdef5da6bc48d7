// ai
//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. A lone process had been told to append
//! records to a file — just a file, they said. Simple, they said. What could go wrong?
//!
//! The file already existed. Somebody's last export, three weeks of work,
//! sitting right where the new one wanted to go. So we refuse. Loudly. Before
//! a single byte crosses the network, and without touching the old file.
//!
//! 🚰 Record → render → channel → RecordWriter → FileSink → BufWriter → disk
//! 💀 Disk full → your problem now
//! 🦆 (mandatory, no notes)

mod file_sink;

pub(crate) use file_sink::FileSink;
