//! Configuration blocks and files into a running module.

use std::io::Write;

use stepper_common::prelude::*;
use stepper_control::config::{ConfigAssembler, ConfigBlock, ConfigMask, load_config, load_config_from_str};
use stepper_control::module::{Module, ModuleState};
use stepper_control::profile::TimerTiming;
use stepper_control::sim::SimHardware;

use super::*;

fn assemble<'a>(blocks: impl IntoIterator<Item = &'a ConfigBlock>) -> ConfigAssembler {
    let mut assembler = ConfigAssembler::new();
    for block in blocks {
        assembler.ingest(block.sub_index(), &block.encode()).unwrap();
    }
    assembler
}

#[test]
fn blocks_in_any_order_configure_a_module() {
    let cfg = with_encoder(linear_axis());
    let blocks = ConfigBlock::from_config(&cfg).unwrap();
    let assembler = assemble(blocks.iter().rev());
    assert!(assembler.is_complete());
    let assembled = assembler.finish().unwrap();
    assert_eq!(assembled, cfg);

    let mut hw = SimHardware::new(1);
    hw.configure_channel(0, &assembled);
    let mut module = Module::new(0);
    module.configure(assembled, TimerTiming::default(), &mut hw, 0).unwrap();
    assert_eq!(module.state(), ModuleState::Init);
}

#[test]
fn missing_block_is_named() {
    let cfg = with_encoder(linear_axis());
    let blocks = ConfigBlock::from_config(&cfg).unwrap();
    let assembler = assemble(blocks.iter().filter(|b| !matches!(b, ConfigBlock::Encoder(_))));
    assert!(!assembler.is_complete());
    assert_eq!(assembler.missing(), ConfigMask::ENCODER);
    assert_eq!(
        assembler.finish(),
        Err(ConfigError::Incomplete { missing: ConfigMask::ENCODER.bits() })
    );
}

#[test]
fn register_driver_waits_for_its_registers() {
    let mut cfg = linear_axis();
    cfg.motor.driver_type = DriverType::SpiRegister;
    cfg.driver_registers = [0x0001_0203, 0x0405_0607, 0x0809_0a0b, 0x0c0d_0e0f].into_iter().collect();
    cfg.validate().unwrap();

    let blocks = ConfigBlock::from_config(&cfg).unwrap();
    let mut assembler = assemble(blocks.iter().filter(|b| !matches!(b, ConfigBlock::DriverRegister { .. })));
    assert_eq!(assembler.missing(), ConfigMask::DRIVER_REGISTERS);

    for block in blocks.iter().filter(|b| matches!(b, ConfigBlock::DriverRegister { .. })) {
        assembler.ingest(block.sub_index(), &block.encode()).unwrap();
    }
    assert_eq!(assembler.finish().unwrap(), cfg);
}

#[test]
fn configuration_file_loads() {
    let cfg = with_encoder(linear_axis());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml::to_string(&cfg).unwrap().as_bytes()).unwrap();

    assert_eq!(load_config(file.path()).unwrap(), cfg);
}

#[test]
fn bad_configuration_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(load_config(&dir.path().join("absent.toml")), Err(ConfigError::FileNotFound));
    assert!(matches!(load_config_from_str("[motor\nhalfsteps_per_rev = "), Err(ConfigError::ParseError(_))));

    let mut cfg = linear_axis();
    cfg.profiles[1].v_min = cfg.profiles[1].v_max;
    let text = toml::to_string(&cfg).unwrap();
    assert!(matches!(
        load_config_from_str(&text),
        Err(ConfigError::InvalidProfile { index: 1, .. })
    ));
}

#[test]
fn profile_slower_than_the_timer_leaves_module_unconfigured() {
    let mut cfg = linear_axis();
    cfg.profiles[1].v_min = 2;
    cfg.profiles[1].microsteps = 1;
    cfg.validate().unwrap();

    let mut hw = SimHardware::new(1);
    let mut module = Module::new(0);
    assert_eq!(
        module.configure(cfg, TimerTiming::default(), &mut hw, 0),
        Err(ConfigError::ProfileVminTooSlow { index: 1 })
    );
    assert_eq!(module.state(), ModuleState::Unconfigured);
    assert!(module.motor().is_none());
}

#[test]
fn asymmetric_jerk_loads_from_toml_only() {
    let mut cfg = with_encoder(linear_axis());
    cfg.profiles[0].acc_jerk_down_ms = 40;
    cfg.profiles[0].dec_jerk_down_ms = 10;
    cfg.validate().unwrap();

    let loaded = load_config_from_str(&toml::to_string(&cfg).unwrap()).unwrap();
    assert_eq!(loaded.profiles[0].acc_jerk_down_ms, 40);
    assert_eq!(loaded.profiles[0].dec_jerk_down_ms, 10);
    assert_eq!(loaded, cfg);

    assert!(matches!(
        ConfigBlock::from_config(&cfg),
        Err(ConfigError::InvalidProfile { index: 0, .. })
    ));
}
