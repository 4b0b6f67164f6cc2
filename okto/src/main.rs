use std::{path::PathBuf, process, thread};

use clap::Parser;
use okto_core::{
    display::{self, Frame},
    emulator::Emulator,
    keypad::{Key, KeyState},
    runner::{ControlEvent, ControlSender, EmulatorEvent, EmulatorHandle, RunOptions},
};
use pixels::{Pixels, SurfaceTexture};
use rodio::{OutputStream, Sink};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::{
    dpi::LogicalSize,
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

use crate::tone::BuzzerTone;

mod tone;

/// RGBA color for the pixel on-state.
const COLOR_ON: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
/// RGBA color for the pixel off-state.
const COLOR_OFF: [u8; 4] = [0x00, 0x00, 0x00, 0xFF];

/// Integer scale applied to the 64x32 grid for the default window size.
const WINDOW_SCALE: usize = 12;

/// A windowed CHIP-8 emulator.
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Cli {
    /// ROM file whose contents are loaded at address 0x200.
    rom_file: PathBuf,
    /// Interpreter cycles per second (timers always tick at 60 Hz).
    #[clap(short, long, default_value_t = 700)]
    cycle_rate: u32,
}

/// The canonical 4x4 hex pad laid over the left of a QWERTY keyboard:
///
/// ```text
/// 1 2 3 C      1 2 3 4
/// 4 5 6 D  <-  Q W E R
/// 7 8 9 E      A S D F
/// A 0 B F      Z X C V
/// ```
fn key_for(virtual_keycode: VirtualKeyCode) -> Option<Key> {
    use VirtualKeyCode::*;

    Some(match virtual_keycode {
        Key1 => Key::K1,
        Key2 => Key::K2,
        Key3 => Key::K3,
        Key4 => Key::KC,
        Q => Key::K4,
        W => Key::K5,
        E => Key::K6,
        R => Key::KD,
        A => Key::K7,
        S => Key::K8,
        D => Key::K9,
        F => Key::KE,
        Z => Key::KA,
        X => Key::K0,
        C => Key::KB,
        V => Key::KF,
        _ => return None,
    })
}

fn key_state_for(state: ElementState) -> KeyState {
    match state {
        ElementState::Pressed => KeyState::Pressed,
        ElementState::Released => KeyState::NotPressed,
    }
}

fn main() -> Result<(), pixels::Error> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let rom = match std::fs::read(&cli.rom_file) {
        Ok(rom) => rom,
        Err(io_error) => {
            error!(%io_error, rom_file = %cli.rom_file.display(), "could not read ROM file");
            process::exit(1);
        }
    };

    let emulator = match Emulator::builder().rom(&rom).build() {
        Ok(emulator) => emulator,
        Err(memory_error) => {
            error!(%memory_error, "could not load ROM");
            process::exit(1);
        }
    };

    let event_loop = EventLoop::<EmulatorEvent>::with_user_event();
    let window = create_window(&event_loop);
    let window_size = window.inner_size();
    let surface_texture = SurfaceTexture::new(window_size.width, window_size.height, &window);
    let mut pixels = Pixels::new(
        display::WIDTH as u32,
        display::HEIGHT as u32,
        surface_texture,
    )?;

    let (_stream, stream_handle) =
        OutputStream::try_default().expect("could not open audio output");
    let sink = Sink::try_new(&stream_handle).expect("could not create audio sink");
    sink.set_volume(0.3);
    sink.pause();
    sink.append(BuzzerTone::new(440.0));

    let (control_sender, event_receiver, join_handle) = emulator.start(RunOptions {
        cycles_per_second: cli.cycle_rate,
    });
    let mut control_sender = Some(control_sender);
    let mut join_handle = Some(join_handle);

    // Bridge emulator events into the window event loop.
    let event_loop_proxy = event_loop.create_proxy();
    thread::Builder::new()
        .name("emulator event forwarder".to_owned())
        .spawn(move || {
            while let Ok(event) = event_receiver.recv() {
                if event_loop_proxy.send_event(event).is_err() {
                    break; // event loop closed
                }
            }
        })
        .expect("could not spawn event forwarder thread");

    let mut frame: Box<Frame> = Box::new([false; display::WIDTH * display::HEIGHT]);

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    shut_down(&mut control_sender, &mut join_handle);
                    *control_flow = ControlFlow::Exit;
                }
                WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            state,
                            virtual_keycode: Some(virtual_keycode),
                            ..
                        },
                    ..
                } => {
                    if virtual_keycode == VirtualKeyCode::Escape && state == ElementState::Pressed {
                        info!("escape pressed, exiting");
                        shut_down(&mut control_sender, &mut join_handle);
                        *control_flow = ControlFlow::Exit;
                    } else if let Some(key) = key_for(virtual_keycode) {
                        let key_state = key_state_for(state);
                        debug!(?key, ?key_state, "key state change");
                        if let Some(sender) = control_sender.as_ref() {
                            // fails only once the emulator thread has stopped
                            let _ = sender.send(ControlEvent::KeyStateChange {
                                key,
                                state: key_state,
                            });
                        }
                    }
                }
                _ => (),
            },
            Event::UserEvent(EmulatorEvent::ScreenUpdate(new_frame)) => {
                frame = new_frame;
                window.request_redraw();
            }
            Event::UserEvent(EmulatorEvent::WaitingForKey) => {
                debug!("emulator is waiting for a key press");
            }
            Event::UserEvent(EmulatorEvent::StartPlayingSound) => sink.play(),
            Event::UserEvent(EmulatorEvent::StopPlayingSound) => sink.pause(),
            Event::UserEvent(EmulatorEvent::ErrorEncountered(cpu_error)) => {
                error!(%cpu_error, "emulator stopped on a fatal fault");
                shut_down(&mut control_sender, &mut join_handle);
                *control_flow = ControlFlow::Exit;
            }
            Event::RedrawRequested(_) => {
                draw_frame(&frame, pixels.get_frame());
                if let Err(render_error) = pixels.render() {
                    error!(%render_error, "could not draw the frame to the surface");
                    *control_flow = ControlFlow::Exit;
                }
            }
            _ => (),
        }
    });
}

fn create_window(event_loop: &EventLoop<EmulatorEvent>) -> Window {
    // fixed size keeps the pixel surface and the window in lockstep
    WindowBuilder::new()
        .with_title("okto")
        .with_resizable(false)
        .with_inner_size(LogicalSize::new(
            (display::WIDTH * WINDOW_SCALE) as f64,
            (display::HEIGHT * WINDOW_SCALE) as f64,
        ))
        .build(event_loop)
        .expect("could not create window")
}

/// Stops the emulator thread and waits for it to finish.
fn shut_down(control_sender: &mut Option<ControlSender>, join_handle: &mut Option<EmulatorHandle>) {
    // dropping the sender is the stop signal
    drop(control_sender.take());
    if let Some(join_handle) = join_handle.take() {
        match join_handle.join() {
            Ok(Ok(())) => (),
            Ok(Err(cpu_error)) => warn!(%cpu_error, "emulator run ended with a fault"),
            Err(_) => warn!("emulator thread panicked"),
        }
    }
}

fn draw_frame(frame: &Frame, pixel_buffer: &mut [u8]) {
    for (rgba, &on) in pixel_buffer.chunks_exact_mut(4).zip(frame.iter()) {
        rgba.copy_from_slice(if on { &COLOR_ON } else { &COLOR_OFF });
    }
}
