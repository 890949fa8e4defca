//  Copyright 2024 MrCroxx
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use rand::Rng;

use super::Generator;

/// Choice of the generated value of [`DiscreteGenerator`].
pub struct Choice<T> {
    /// Value to generate.
    pub val: T,
    /// Possibility weight of the choice.
    pub weight: f64,
}

/// Generates a distribution by choosing from a discrete set of values.
///
/// This is the synthesizer's weighted sampling primitive: a cumulative
/// distribution scan over discrete weights, the same algorithm as the
/// original generator's `convertCountsToCumulativeDistribution` +
/// `sampleFromCounts`.
pub struct DiscreteGenerator<T> {
    choices: Vec<Choice<T>>,
    sum: f64,
}

impl<T> DiscreteGenerator<T> {
    /// Create a generator that generates a distribution by choosing from a discrete set of values.
    /// Choices with non-positive weight are dropped (they can never be sampled).
    pub fn new(choices: Vec<Choice<T>>) -> Self {
        let choices: Vec<_> = choices.into_iter().filter(|c| c.weight > 0.0).collect();
        let sum = choices.iter().map(|choice| choice.weight).sum();
        Self { choices, sum }
    }

    /// Whether there is nothing to sample from.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

impl<T> Generator for DiscreteGenerator<T>
where
    T: Clone,
{
    type Output = Option<T>;

    fn next(&self, rng: &mut dyn rand::RngCore) -> Self::Output {
        if self.choices.is_empty() {
            return None;
        }
        let target = rng.gen_range(0.0..self.sum);
        let mut acc = 0.0;
        for choice in self.choices.iter() {
            acc += choice.weight;
            if target < acc {
                return Some(choice.val.clone());
            }
        }
        // Floating point rounding can leave `target` a hair above the last
        // cumulative boundary; fall back to the last choice rather than
        // panicking.
        self.choices.last().map(|c| c.val.clone())
    }
}
