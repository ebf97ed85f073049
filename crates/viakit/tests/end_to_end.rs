//! End to end: configuration, discovery, a session and macro text, all
//! against the virtual keyboard.

use viakit::prelude::*;
use viakit::protocol::sim::VirtualKeyboard;
use viakit::transport::mock::{via_device_info, MockBackend};

const CONFIG: &str = r#"{
    "client": { "command_timeout_ms": 250 },
    "profiles": [{
        "name": "Virtual Planck",
        "vendor_id": 18003,
        "product_id": 1,
        "matrix": { "rows": 4, "cols": 12 },
        "lighting": ["brightness"]
    }]
}"#;

#[tokio::test]
async fn test_configured_manager_edits_macros_and_keymap() -> Result<(), ViakitError> {
    let config = ViakitConfig::from_json_str(CONFIG)?;
    let backend = MockBackend::new();
    let info = via_device_info(0x4653, 0x0001, "Planck");
    let _sim = VirtualKeyboard::new(11)
        .with_matrix(4, 4, 12)
        .spawn(backend.plug(info.clone()));
    let manager = DeviceManager::new(backend, config.manager_config());

    let devices = manager.list_devices().await?;
    assert_eq!(devices.len(), 1);
    let session = manager.open(devices[0].info.id).await?;
    assert_eq!(session.capabilities().lighting(), vec![LightingValue::Brightness]);

    let table = config.keycode_table();
    let text = "{KC_LSFT,KC_A}bc{250}{KC_ENT}";
    let expression = MacroExpression::parse(text, &table, session.protocol_version())?;
    session.write_macros(&[expression]).await?;
    let macros = session.read_macros().await?;
    assert_eq!(macros[0].to_text(&table), text);

    session.set_keycode(1, 3, 11, 0x0029).await?;
    let layer = session.read_layer(1).await?;
    assert_eq!(layer[3 * 12 + 11], 0x0029);

    manager.close(info.id)?;
    assert!(session.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_errors_convert_into_viakit_error() {
    let config = ViakitConfig::default();
    let manager = DeviceManager::new(MockBackend::new(), config.manager_config());

    let err: ViakitError = manager
        .open(DeviceId::new(404))
        .await
        .expect_err("nothing attached")
        .into();
    assert!(err.to_string().contains("hid-404"));
}
