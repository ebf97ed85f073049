//! `viakit`: inspect and edit a VIA keyboard from the command line.
//!
//! Runs against a virtual keyboard unless built with the `hidapi` feature
//! and started with `--hid`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use viakit::prelude::*;
use viakit::protocol::sim::VirtualKeyboard;
use viakit::transport::mock::{via_device_info, MockBackend};

const SIM_VENDOR_ID: u16 = 0x4653;
const SIM_PRODUCT_ID: u16 = 0x0001;

#[derive(Parser)]
#[command(name = "viakit")]
#[command(about = "Inspect and edit VIA keyboards")]
#[command(version)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device id as printed by `list`. Defaults to the first device.
    #[arg(short, long, global = true)]
    device: Option<u64>,

    /// Protocol version the virtual keyboard speaks. Lighting needs 11 or lower.
    #[arg(long, default_value_t = 11, global = true)]
    sim_version: u16,

    /// Use real devices instead of the virtual keyboard.
    #[cfg(feature = "hidapi")]
    #[arg(long, global = true)]
    hid: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List attached VIA keyboards.
    List,
    /// Show protocol version and capabilities.
    Info,
    /// Print every macro slot as text.
    Macros,
    /// Replace one macro slot, keeping the others.
    SetMacro {
        slot: usize,
        text: String,
        /// Append `{KC_ENT}` to the macro.
        #[arg(long)]
        enter: bool,
    },
    /// Print one layer of the keymap.
    Keymap {
        #[arg(default_value_t = 0)]
        layer: u8,
    },
    /// Assign a keycode (name or hex) to one key.
    SetKey {
        layer: u8,
        row: u8,
        col: u8,
        keycode: String,
    },
    /// Show lighting values, or set one.
    Lighting {
        /// Value name, e.g. `brightness`.
        #[arg(long, requires = "data")]
        set: Option<String>,
        /// Bytes to write.
        #[arg(long, num_args = 1..=2)]
        data: Vec<u8>,
        /// Persist to EEPROM after writing.
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ViakitConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ViakitConfig::default(),
    };
    match &config.log_filter {
        Some(filter) => viakit::init_tracing_with(filter),
        None => viakit::init_tracing(),
    }

    #[cfg(feature = "hidapi")]
    if cli.hid {
        let backend = viakit::transport::HidapiBackend::new(std::time::Duration::from_millis(500))
            .context("initialising hidapi")?;
        let manager = DeviceManager::new(backend, config.manager_config());
        return run(&cli, &config, &manager).await;
    }

    if !config
        .profiles
        .iter()
        .any(|p| p.matches(SIM_VENDOR_ID, SIM_PRODUCT_ID))
    {
        config.profiles.push(
            DeviceProfile::new(SIM_VENDOR_ID, SIM_PRODUCT_ID)
                .with_name("Virtual Planck")
                .with_matrix(4, 12)
                .with_lighting(&[
                    LightingValue::Brightness,
                    LightingValue::Effect,
                    LightingValue::EffectSpeed,
                    LightingValue::Color1,
                ]),
        );
    }
    let backend = MockBackend::new();
    let info = via_device_info(SIM_VENDOR_ID, SIM_PRODUCT_ID, "viakit virtual keyboard");
    let _sim = VirtualKeyboard::new(cli.sim_version)
        .with_matrix(4, 4, 12)
        .spawn(backend.plug(info));
    tracing::debug!(version = cli.sim_version, "virtual keyboard attached");

    let manager = DeviceManager::new(backend, config.manager_config());
    run(&cli, &config, &manager).await
}

async fn run<B: HidBackend>(
    cli: &Cli,
    config: &ViakitConfig,
    manager: &DeviceManager<B>,
) -> Result<()> {
    let devices = manager.list_devices().await?;
    if let Cmd::List = cli.command {
        if devices.is_empty() {
            println!("no VIA keyboards found");
        }
        for device in &devices {
            let info = &device.info;
            println!(
                "{:>3}  {:04x}:{:04x}  {:<10}  {}",
                info.id.into_inner(),
                info.vendor_id,
                info.product_id,
                device.state,
                info.display_name()
            );
        }
        return Ok(());
    }

    let id = match cli.device {
        Some(raw) => DeviceId::new(raw),
        None => match devices.first() {
            Some(device) => device.info.id,
            None => bail!("no VIA keyboards found"),
        },
    };
    let session = manager
        .open(id)
        .await
        .with_context(|| format!("opening {id}"))?;
    let table = config.keycode_table();

    let result = execute(&cli.command, &session, &table).await;
    manager.close(id)?;
    result
}

async fn execute(cmd: &Cmd, session: &ProtocolSession, table: &KeycodeTable) -> Result<()> {
    match cmd {
        Cmd::List => {}
        Cmd::Info => {
            let caps = session.capabilities();
            println!("device:          {}", session.info().display_name());
            println!("protocol:        {}", caps.protocol_version);
            println!("layers:          {}", caps.layer_count);
            println!("macros:          {} slots, {} bytes", caps.macro_count, caps.macro_buffer_size);
            println!("firmware:        0x{:08x}", session.get_firmware_version().await?);
            println!("layout options:  0x{:08x}", session.get_layout_options().await?);
            let features: Vec<String> = caps.features().iter().map(|f| format!("{f:?}")).collect();
            println!("features:        {}", features.join(", "));
        }
        Cmd::Macros => {
            for (slot, expression) in session.read_macros().await?.iter().enumerate() {
                println!("{slot:>2}: {}", expression.to_text(table));
            }
        }
        Cmd::SetMacro { slot, text, enter } => {
            let text = if *enter {
                viakit::macros::append_enter(text)
            } else {
                text.clone()
            };
            let expression = MacroExpression::parse(&text, table, session.protocol_version())?;
            let mut macros = session.read_macros().await?;
            match macros.get_mut(*slot) {
                Some(existing) => *existing = expression,
                None => bail!("slot {slot} does not exist, device has {}", macros.len()),
            }
            session.write_macros(&macros).await?;
            println!("slot {slot}: {}", macros[*slot].to_text(table));
        }
        Cmd::Keymap { layer } => {
            let keys = session.read_layer(*layer).await?;
            let cols = session.profile().matrix.as_ref().map_or(keys.len(), |m| m.cols as usize);
            for row in keys.chunks(cols.max(1)) {
                let cells: Vec<String> = row.iter().map(|kc| keycode_label(*kc, table)).collect();
                println!("{}", cells.join(" "));
            }
        }
        Cmd::SetKey {
            layer,
            row,
            col,
            keycode,
        } => {
            let code = parse_keycode(keycode, table)?;
            session.set_keycode(*layer, *row, *col, code).await?;
            println!("layer {layer} ({row}, {col}) = {}", keycode_label(code, table));
        }
        Cmd::Lighting { set, data, save } => {
            if let Some(name) = set {
                let value = parse_lighting_value(name)?;
                session.set_lighting_value(value, data).await?;
                if *save {
                    session.save_lighting().await?;
                }
            }
            for value in session.capabilities().lighting() {
                let current = session.get_lighting_value(value).await?;
                println!("{value:<32} {current:?}");
            }
        }
    }
    Ok(())
}

fn keycode_label(code: u16, table: &KeycodeTable) -> String {
    u8::try_from(code)
        .ok()
        .and_then(|byte| table.name_of(viakit::macros::Keycode(byte)))
        .map(|name| format!("{name:<8}"))
        .unwrap_or_else(|| format!("0x{code:04X}  "))
}

fn parse_keycode(text: &str, table: &KeycodeTable) -> Result<u16> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16).with_context(|| format!("bad keycode {text}"));
    }
    match table.lookup(text) {
        Some(kc) => Ok(u16::from(kc.byte())),
        None => bail!("unknown keycode {text}"),
    }
}

fn parse_lighting_value(name: &str) -> Result<LightingValue> {
    let wanted: String = name.chars().filter(|c| *c != '_' && *c != '-').collect();
    match LightingValue::ALL
        .into_iter()
        .find(|v| format!("{v:?}").eq_ignore_ascii_case(&wanted))
    {
        Some(value) => Ok(value),
        None => bail!("unknown lighting value {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keycode_hex_and_name() {
        let table = KeycodeTable::basic();
        assert_eq!(parse_keycode("0x5F10", &table).expect("hex"), 0x5F10);
        assert_eq!(parse_keycode("kc_ent", &table).expect("name"), 0x28);
        assert!(parse_keycode("KC_NOPE", &table).is_err());
    }

    #[test]
    fn test_parse_lighting_value_accepts_snake_case() {
        assert_eq!(
            parse_lighting_value("effect_speed").expect("known"),
            LightingValue::EffectSpeed
        );
        assert!(parse_lighting_value("disco").is_err());
    }

    #[test]
    fn test_cli_parses_set_macro() {
        let cli = Cli::try_parse_from(["viakit", "set-macro", "2", "hi{KC_ENT}"]).expect("parse");
        assert!(matches!(cli.command, Cmd::SetMacro { slot: 2, .. }));
    }
}
