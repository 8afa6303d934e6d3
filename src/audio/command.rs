//! Commands sent from the walker thread to the audio thread via ring buffer.

#[derive(Debug)]
pub enum AudioCommand {
    /// Mix interleaved stereo samples in starting at an absolute frame.
    Schedule { start_frame: u64, samples: Vec<f32> },

    /// Set master volume (0.0 to 1.0).
    SetVolume(f32),

    /// Drop every scheduled voice.
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::{
        traits::{Consumer, Producer, Split},
        HeapRb,
    };

    #[test]
    fn test_schedule_round_trips_through_queue() {
        let rb = HeapRb::<AudioCommand>::new(16);
        let (mut prod, mut cons) = rb.split();

        prod.try_push(AudioCommand::Schedule {
            start_frame: 480,
            samples: vec![0.1, -0.1],
        })
        .unwrap();

        match cons.try_pop().unwrap() {
            AudioCommand::Schedule {
                start_frame,
                samples,
            } => {
                assert_eq!(start_frame, 480);
                assert_eq!(samples, vec![0.1, -0.1]);
            }
            _ => panic!("expected Schedule command"),
        }
    }

    #[test]
    fn test_command_ordering_preserved() {
        let rb = HeapRb::<AudioCommand>::new(16);
        let (mut prod, mut cons) = rb.split();

        prod.try_push(AudioCommand::SetVolume(0.5)).unwrap();
        prod.try_push(AudioCommand::Schedule {
            start_frame: 0,
            samples: vec![1.0, 1.0],
        })
        .unwrap();
        prod.try_push(AudioCommand::Stop).unwrap();

        assert!(matches!(cons.try_pop().unwrap(), AudioCommand::SetVolume(_)));
        assert!(matches!(
            cons.try_pop().unwrap(),
            AudioCommand::Schedule { .. }
        ));
        assert!(matches!(cons.try_pop().unwrap(), AudioCommand::Stop));
        assert!(cons.try_pop().is_none());
    }
}
