#![no_std]
#![no_main]

use cortex_m_rt::entry;
use defmt_rtt as _;
use embedded_hal_bus::spi::ExclusiveDevice;
use hal::prelude::*;
use panic_probe as _;
use stm32f4xx_hal::{self as hal, hal_02::spi::MODE_0, rcc::Config, spi::Spi};

use enc28j60::Enc28j60;
use ipstack::{MacAddress, NetStack};

/// Locally administered station address; there is no EEPROM on the board to
/// hold a burned-in one.
const MAC: MacAddress = MacAddress([0x02, 0x4a, 0x30, 0x04, 0x20, 0x0b]);

#[entry]
fn main() -> ! {
    let mut cp = cortex_m::peripheral::Peripherals::take().unwrap();
    let dp = hal::pac::Peripherals::take().unwrap();

    // システムクロックの設定
    let mut rcc = dp.RCC.freeze(Config::hsi().sysclk(16.MHz()));

    // GPIO 初期化
    let gpioa = dp.GPIOA.split(&mut rcc);
    let gpiob = dp.GPIOB.split(&mut rcc);
    let gpiod = dp.GPIOD.split(&mut rcc);

    // SPI1 ピン設定
    let sck = gpioa.pa5.into_alternate();
    let miso = gpioa.pa6.into_alternate();
    let mosi = gpioa.pa7.into_alternate();

    // ENC28J60 チップセレクト
    let cs = gpiob.pb1.into_push_pull_output();

    // リースを取得したら点灯する
    let mut link_led = gpiod.pd13.into_push_pull_output();

    let mut spi = Spi::new(
        dp.SPI1,
        (Some(sck), Some(miso), Some(mosi)),
        MODE_0,
        8.MHz(), // 最大20MHz程度までOK
        &mut rcc,
    );

    let dly = cp.SYST.delay(&rcc.clocks);
    let dev = ExclusiveDevice::new(&mut spi, cs, dly).expect("Set up SpiDevice");

    let mut enc = Enc28j60::new(dev);
    let mut dly = dp.TIM2.delay_us(&mut rcc);
    enc.init(&MAC.octets(), &mut dly).expect("initialize");
    defmt::info!("ENC28J60 up, silicon revision {}", enc.revision().unwrap_or(0xff));

    // サイクルカウンタを DHCP トランザクション ID のシードに使う
    cp.DCB.enable_trace();
    cp.DWT.enable_cycle_counter();
    let seed = cortex_m::peripheral::DWT::cycle_count();

    let mut stack = NetStack::new(enc, MAC, seed);

    // DHCP リース取得ループ
    while !stack.dhcp_ready() {
        if stack.maintain_dhcp().is_err() {
            defmt::warn!("DISCOVER transmit failed");
        }
        let _ = stack.poll();
    }
    defmt::info!(
        "lease acquired: ip={} mask={} gw={}",
        stack.ip(),
        stack.subnet_mask(),
        stack.gateway()
    );
    link_led.set_high();

    // 以降は ARP と ping に応答し続ける
    loop {
        if stack.poll().is_err() {
            defmt::warn!("poll failed");
        }
    }
}
