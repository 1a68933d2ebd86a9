/// Example: sf2_tool info "./banks/*.sf2"
/// Example: sf2_tool zones ./banks/gm.sf2 --bank 0 --program 24
/// Example: sf2_tool compile ./banks/gm.sf2 --bank 128 --program 0 --note 38
/// Example: sf2_tool to-xml "./banks/*.sf2" -o unpack --samples
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;

use clap::{command, Parser, Subcommand};
use colored::Colorize;

use sfmix::binutils::{
    get_final_output_folder, get_input_output_pairs, open_file_overwrite_rw, VERSION,
};
use sfmix::engine::{InstrumentKind, GM_PROGRAM_NAMES};
use sfmix::sf2::compile::{create_from_preset, create_from_preset_with_note, looks_like_drum_kit};
use sfmix::sf2::resolver::{find_in_range, preset_gen_range_for_instrument};
use sfmix::sf2::{unpack_range, Bank, GenTag, RANGE_DEFAULT};

#[derive(Parser)]
#[command(author, version = VERSION, about = "Inspection tools for SF2 patch banks", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the presets, instruments, and samples of each bank
    Info {
        /// Path glob of the SF2 files to inspect
        #[arg(value_name = "INPUT")]
        input_glob: String,
    },
    /// Print the resolved zones of one preset
    Zones {
        /// SF2 file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// MIDI bank number (128 = percussion)
        #[arg(short, long, default_value_t = 0)]
        bank: u16,

        /// Program number
        #[arg(short, long, default_value_t = 0)]
        program: u16,
    },
    /// Compile a preset and summarize the produced instrument
    Compile {
        /// SF2 file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// MIDI bank number (128 = percussion)
        #[arg(short, long, default_value_t = 0)]
        bank: u16,

        /// Program number
        #[arg(short, long, default_value_t = 0)]
        program: u16,

        /// Build a single drum note instead of the full preset
        #[arg(short, long)]
        note: Option<u8>,
    },
    /// Dump bank tables as XML
    ToXml {
        /// Path glob of the SF2 files to dump
        #[arg(value_name = "INPUT")]
        input_glob: String,

        /// Folder for the XML output
        #[arg(short = 'o', long, value_name = "OUTPUT")]
        output_folder: Option<PathBuf>,

        /// Embed per-sample PCM as base64
        #[arg(long)]
        samples: bool,
    },
}

fn load_bank(path: &PathBuf) -> Result<Bank, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    Ok(Bank::read_from_file(&mut BufReader::new(file))?)
}

fn program_label(bank: u16, program: u16) -> String {
    if bank == 128 {
        format!("kit {}", program)
    } else {
        GM_PROGRAM_NAMES
            .get(&(program.min(127) as u8))
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("program {}", program))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Info { input_glob } => {
            for entry in glob::glob(input_glob)? {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        println!("{:?}", e);
                        continue;
                    }
                };
                print!("Reading {}... ", path.display());
                let bank = match load_bank(&path) {
                    Ok(bank) => bank,
                    Err(e) => {
                        println!("{}{}", "failed: ".red(), e);
                        continue;
                    }
                };
                println!("done!");
                println!(
                    "  {} presets, {} instruments, {} samples, {} pool frames",
                    bank.presets.len(),
                    bank.instruments.len(),
                    bank.sample_headers.len(),
                    bank.samples.len()
                );
                for (i, preset) in bank.presets.records.iter().enumerate() {
                    let kit = if looks_like_drum_kit(&bank, i) {
                        " [kit]".yellow().to_string()
                    } else {
                        String::new()
                    };
                    println!(
                        "  {:3}:{:3}  {:20}  ({}){}",
                        preset.bank,
                        preset.preset,
                        preset.name_str(),
                        program_label(preset.bank, preset.preset),
                        kit
                    );
                }
            }
        }
        Commands::Zones {
            input,
            bank: bank_num,
            program,
        } => {
            let bank = load_bank(input)?;
            let preset_index = bank
                .find_preset(*bank_num, *program)
                .ok_or_else(|| format!("no preset {}:{}", bank_num, program))?;
            let preset = &bank.presets.records[preset_index];
            println!(
                "{} '{}' ({})",
                format!("{}:{}", bank_num, program).green(),
                preset.name_str(),
                program_label(*bank_num, *program)
            );
            let (bag_start, bag_end) = bank.preset_bag_range(preset_index);
            for bag_idx in bag_start..bag_end {
                let (gs, ge) = bank.preset_gen_range(bag_idx);
                let inst =
                    find_in_range(&bank.preset_gens.records, gs, ge, GenTag::Instrument, -1);
                if inst < 0 || inst as usize >= bank.instruments.len() {
                    println!("  pbag {}: global zone ({} generators)", bag_idx, ge - gs);
                    continue;
                }
                let header = &bank.instruments.records[inst as usize];
                println!("  pbag {}: instrument {} '{}'", bag_idx, inst, header.name_str());
                let preset_range =
                    preset_gen_range_for_instrument(&bank, preset_index, inst as usize)
                        .unwrap_or((0, 0));
                let (ibag_start, ibag_end) = bank.inst_bag_range(inst as usize);
                for ibag in ibag_start..ibag_end {
                    let (igs, ige) = bank.inst_gen_range(ibag);
                    let sample =
                        find_in_range(&bank.inst_gens.records, igs, ige, GenTag::SampleId, -1);
                    if sample < 0 || sample as usize >= bank.sample_headers.len() {
                        println!("    ibag {}: global zone", ibag);
                        continue;
                    }
                    let key = find_in_range(
                        &bank.inst_gens.records,
                        igs,
                        ige,
                        GenTag::KeyRange,
                        RANGE_DEFAULT,
                    );
                    let vel = find_in_range(
                        &bank.inst_gens.records,
                        igs,
                        ige,
                        GenTag::VelRange,
                        RANGE_DEFAULT,
                    );
                    let (klo, khi) = unpack_range(key);
                    let (vlo, vhi) = unpack_range(vel);
                    let sample_name = bank.sample_headers.records[sample as usize].name_str();
                    println!(
                        "    ibag {}: keys {:3}-{:3} vel {:3}-{:3} sample {} '{}' (pgen {}..{})",
                        ibag, klo, khi, vlo, vhi, sample, sample_name, preset_range.0, preset_range.1
                    );
                }
            }
        }
        Commands::Compile {
            input,
            bank: bank_num,
            program,
            note,
        } => {
            let bank = load_bank(input)?;
            let instrument = match note {
                Some(note) => create_from_preset_with_note(&bank, *bank_num, *program, *note)?,
                None => create_from_preset(&bank, *bank_num, *program)?,
            };
            match &instrument.kind {
                InstrumentKind::Simple(w) => {
                    println!("{}", "simple instrument".green());
                    println!(
                        "  waveform: {} frames @ {:.1} Hz, base pitch {}, loop {}..{}",
                        w.frames,
                        sfmix::dtype::fixed_to_f64(w.sampled_rate),
                        w.base_midi_pitch,
                        w.start_loop,
                        w.end_loop
                    );
                }
                InstrumentKind::KeymapSplit { splits, .. } => {
                    println!("{} ({} zones)", "keymap split instrument".green(), splits.len());
                    for split in splits {
                        let w = split.instrument.waveform();
                        println!(
                            "  keys {:3}-{:3} vel {:3}-{:3} pitch {}",
                            split.low_key,
                            split.high_key,
                            split.vel_range & 0xFF,
                            split.vel_range >> 8,
                            w.map(|w| w.base_midi_pitch).unwrap_or(-1)
                        );
                    }
                }
            }
            println!(
                "  volume envelope: {} stages; mod envelope: {} stages",
                instrument.volume_envelope.active_stages(),
                instrument.mod_envelope.active_stages()
            );
            println!(
                "  {} LFOs, {} modulation curves, looping {}",
                instrument.lfos.len(),
                instrument.curves.len(),
                if instrument.disable_looping {
                    "off"
                } else {
                    "on"
                }
            );
        }
        Commands::ToXml {
            input_glob,
            output_folder,
            samples,
        } => {
            let output_folder = get_final_output_folder(output_folder)?;
            let pairs = get_input_output_pairs(input_glob, "sf2", &output_folder, "sf2.xml")?;
            for (input_path, output_path) in pairs {
                print!("Converting {}... ", input_path.display());
                let bank = load_bank(&input_path)?;
                let xml = bank.to_xml(*samples)?;
                open_file_overwrite_rw(output_path)?.write_all(xml.as_bytes())?;
                println!("done!");
            }
            println!("\nAll files successfully processed.");
        }
    }

    Ok(())
}
